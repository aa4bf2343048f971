//! Table Order - live order synchronization
//!
//! Keeps a kitchen display's pending queue (orders and staff calls) in sync
//! with the backend: an authoritative REST bootstrap on mount and on every
//! reconnect, a WebSocket push channel for incremental inserts, identity
//! based deduplication, a new-order alarm and completion round-trips. The
//! ordering side adds cart handling, order submission, staff calls and an
//! exactly-once payment confirmation guard.

pub mod alarm;
pub mod api;
pub mod bootstrap;
pub mod channel;
pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod display;
pub mod error;
pub mod events;
pub mod models;
pub mod ordering;
pub mod payment;
pub mod polling;
pub mod reconciler;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use alarm::{AudioPlayback, TerminalBell};
pub use api::{Backend, HttpBackend};
pub use channel::{ChannelHandle, PushTransport, ReconnectPolicy, WebSocketTransport};
pub use config::{LiveConfig, Mode};
pub use display::{DisplayOptions, KitchenDisplay};
pub use error::{
    ApiError, ChannelError, CompletionError, ConfigError, FrameError, PaymentError,
    SelectionError, SubmitError,
};
pub use events::{DisplayEvent, EventBus};
pub use models::{AlarmState, ConnectionState, EntityKind, Order, OrderItem, PushEvent, ServiceCall};
pub use ordering::{
    Cart, MenuChoice, MenuOption, OptionGroup, OptionSelection, SelectedOption, StaffRequest,
    SubmittedOrder,
};
pub use payment::{ConfirmDisposition, PaymentGuard, RedirectReturn};
pub use store::QueueSnapshot;
