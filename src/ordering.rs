//! Ordering screen: menu option selection, cart, option descriptions, order
//! submission and staff calls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::api::Backend;
use crate::error::{ApiError, SelectionError, SubmitError};

/// Group name used for options that do not belong to a named group.
const DEFAULT_OPTION_GROUP: &str = "Options";

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionGroup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub order_index: i32,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_single_select: bool,
    /// Cap for multi-select groups; 0 means unlimited.
    #[serde(default)]
    pub max_select: u32,
    #[serde(default)]
    pub options: Vec<MenuOption>,
}

impl OptionGroup {
    fn limit(&self) -> Option<u32> {
        if self.is_single_select {
            Some(1)
        } else if self.max_select > 0 {
            Some(self.max_select)
        } else {
            None
        }
    }

    fn offers(&self, option_id: i64) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// A menu the customer picked, with its base price and option groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuChoice {
    #[serde(alias = "id")]
    pub menu_id: i64,
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub is_sold_out: bool,
    #[serde(default)]
    pub option_groups: Vec<OptionGroup>,
}

impl MenuChoice {
    fn sorted_groups(&self) -> Vec<&OptionGroup> {
        let mut groups: Vec<&OptionGroup> = self.option_groups.iter().collect();
        groups.sort_by_key(|g| g.order_index);
        groups
    }

    /// Check a finished pick against the menu's option groups. Menus without
    /// groups accept any options.
    pub fn validate(&self, options: &[SelectedOption]) -> Result<(), SelectionError> {
        if self.is_sold_out {
            return Err(SelectionError::SoldOut(self.name.clone()));
        }
        if self.option_groups.is_empty() {
            return Ok(());
        }
        if let Some(unknown) = options
            .iter()
            .find(|o| !self.option_groups.iter().any(|g| g.offers(o.id)))
        {
            return Err(SelectionError::UnknownOption(unknown.id));
        }
        for group in self.sorted_groups() {
            let picked = options.iter().filter(|o| group.offers(o.id)).count();
            if group.is_required && picked == 0 {
                return Err(SelectionError::Required {
                    group: group.name.clone(),
                });
            }
            if let Some(max) = group.limit() {
                if picked > max as usize {
                    return Err(SelectionError::TooMany {
                        group: group.name.clone(),
                        max,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedOption {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub group_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Option selection
// ---------------------------------------------------------------------------

/// Option picks for one menu while the option sheet is open.
#[derive(Debug, Clone)]
pub struct OptionSelection<'m> {
    menu: &'m MenuChoice,
    selected: BTreeSet<i64>,
}

impl<'m> OptionSelection<'m> {
    /// Open the option sheet for `menu` with defaults preselected: single-select
    /// and required groups start on their default option, and a required
    /// single-select group without one starts on its first option.
    pub fn open(menu: &'m MenuChoice) -> Result<Self, SelectionError> {
        if menu.is_sold_out {
            return Err(SelectionError::SoldOut(menu.name.clone()));
        }
        let mut selected = BTreeSet::new();
        for group in menu.sorted_groups() {
            if !(group.is_single_select || group.is_required) {
                continue;
            }
            let default = group.options.iter().find(|o| o.is_default).or_else(|| {
                (group.is_single_select && group.is_required)
                    .then(|| group.options.first())
                    .flatten()
            });
            if let Some(option) = default {
                selected.insert(option.id);
            }
        }
        Ok(Self { menu, selected })
    }

    pub fn menu(&self) -> &MenuChoice {
        self.menu
    }

    pub fn is_selected(&self, option_id: i64) -> bool {
        self.selected.contains(&option_id)
    }

    /// Toggle `option_id` in `group_id`. In a single-select group it replaces
    /// the current pick; in a capped group a pick over the cap is refused and
    /// the selection is left as it was.
    pub fn toggle(&mut self, group_id: i64, option_id: i64) -> Result<(), SelectionError> {
        let group = self
            .menu
            .option_groups
            .iter()
            .find(|g| g.id == group_id && g.offers(option_id))
            .ok_or(SelectionError::UnknownOption(option_id))?;

        if group.is_single_select {
            for option in &group.options {
                self.selected.remove(&option.id);
            }
            self.selected.insert(option_id);
            return Ok(());
        }
        if self.selected.remove(&option_id) {
            return Ok(());
        }
        if group.max_select > 0 {
            let picked = group
                .options
                .iter()
                .filter(|o| self.selected.contains(&o.id))
                .count();
            if picked >= group.max_select as usize {
                debug!(group = %group.name, max = group.max_select, "Option cap reached");
                return Err(SelectionError::TooMany {
                    group: group.name.clone(),
                    max: group.max_select,
                });
            }
        }
        self.selected.insert(option_id);
        Ok(())
    }

    /// Selected options in group order, each tagged with its group name.
    pub fn options(&self) -> Vec<SelectedOption> {
        self.menu
            .sorted_groups()
            .into_iter()
            .flat_map(|group| {
                group
                    .options
                    .iter()
                    .filter(|o| self.selected.contains(&o.id))
                    .map(|o| SelectedOption {
                        id: o.id,
                        name: o.name.clone(),
                        price: o.price,
                        group_name: Some(group.name.clone()),
                    })
            })
            .collect()
    }

    pub fn unit_price(&self) -> i64 {
        self.menu.price + self.options().iter().map(|o| o.price).sum::<i64>()
    }
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub line_id: u64,
    pub menu_id: i64,
    pub name: String,
    /// Base price plus all selected option prices.
    pub unit_price: i64,
    pub quantity: u32,
    pub options: Vec<SelectedOption>,
}

impl CartLine {
    fn option_key(&self) -> Vec<i64> {
        option_key(&self.options)
    }

    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

fn option_key(options: &[SelectedOption]) -> Vec<i64> {
    let mut ids: Vec<i64> = options.iter().map(|o| o.id).collect();
    ids.sort_unstable();
    ids
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart {
    lines: Vec<CartLine>,
    next_line_id: u64,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit. The same menu with the same set of option ids merges
    /// into the existing line. Returns the line id.
    pub fn add(
        &mut self,
        menu: &MenuChoice,
        options: Vec<SelectedOption>,
    ) -> Result<u64, SelectionError> {
        menu.validate(&options)?;
        let key = option_key(&options);
        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|l| l.menu_id == menu.menu_id && l.option_key() == key)
        {
            line.quantity += 1;
            return Ok(line.line_id);
        }

        self.next_line_id += 1;
        let unit_price = menu.price + options.iter().map(|o| o.price).sum::<i64>();
        self.lines.push(CartLine {
            line_id: self.next_line_id,
            menu_id: menu.menu_id,
            name: menu.name.clone(),
            unit_price,
            quantity: 1,
            options,
        });
        Ok(self.next_line_id)
    }

    /// Confirm an option sheet into the cart.
    pub fn add_selection(&mut self, selection: &OptionSelection<'_>) -> Result<u64, SelectionError> {
        self.add(selection.menu(), selection.options())
    }

    /// Change a line's quantity by `delta`; lines reaching zero are removed.
    pub fn update_quantity(&mut self, line_id: u64, delta: i32) -> bool {
        let Some(line) = self.lines.iter_mut().find(|l| l.line_id == line_id) else {
            return false;
        };
        let next = i64::from(line.quantity) + i64::from(delta);
        line.quantity = next.clamp(0, i64::from(u32::MAX)) as u32;
        self.lines.retain(|l| l.quantity > 0);
        true
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total(&self) -> i64 {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Kitchen-facing option text: consecutive options of the same group are
/// joined as `"Group - a, b"`, one group per line.
pub fn describe_options(options: &[SelectedOption]) -> String {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for opt in options {
        let group = opt.group_name.as_deref().unwrap_or(DEFAULT_OPTION_GROUP);
        match groups.last_mut() {
            Some((name, items)) if *name == group => items.push(&opt.name),
            _ => groups.push((group, vec![&opt.name])),
        }
    }
    groups
        .iter()
        .map(|(name, items)| format!("{name} - {}", items.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Order submission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionLine {
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionItem {
    pub menu_id: i64,
    pub quantity: u32,
    pub options: Vec<OptionLine>,
    pub options_desc: String,
    pub price: i64,
}

/// Body of `POST /orders/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSubmission {
    pub store_id: i64,
    pub table_id: i64,
    pub items: Vec<SubmissionItem>,
}

impl OrderSubmission {
    pub fn from_cart(store_id: i64, table_id: i64, cart: &Cart) -> Result<Self, SubmitError> {
        if cart.is_empty() {
            return Err(SubmitError::EmptyCart);
        }
        let items = cart
            .lines()
            .iter()
            .map(|line| SubmissionItem {
                menu_id: line.menu_id,
                quantity: line.quantity,
                options: line
                    .options
                    .iter()
                    .map(|o| OptionLine {
                        name: o.name.clone(),
                        price: o.price,
                    })
                    .collect(),
                options_desc: describe_options(&line.options),
                price: line.unit_price,
            })
            .collect();
        Ok(Self {
            store_id,
            table_id,
            items,
        })
    }
}

/// What the backend returned for a submitted order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmittedOrder {
    pub order_id: Option<i64>,
    pub display_number: Option<u32>,
}

pub async fn submit_order(
    backend: &dyn Backend,
    store_id: i64,
    table_id: i64,
    cart: &Cart,
) -> Result<SubmittedOrder, SubmitError> {
    let submission = OrderSubmission::from_cart(store_id, table_id, cart)?;
    let submitted = backend.submit_order(&submission).await?;
    info!(
        store_id,
        table_id,
        lines = submission.items.len(),
        order_id = ?submitted.order_id,
        "Order submitted"
    );
    Ok(submitted)
}

// ---------------------------------------------------------------------------
// Staff calls
// ---------------------------------------------------------------------------

/// Preset requests offered on the ordering screen, plus free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaffRequest {
    Water,
    Apron,
    SideDishRefill,
    WetTissue,
    Cutlery,
    StaffOnly,
    Custom(String),
}

impl StaffRequest {
    pub fn message(&self) -> &str {
        match self {
            StaffRequest::Water => "Water",
            StaffRequest::Apron => "Apron",
            StaffRequest::SideDishRefill => "Side dish refill",
            StaffRequest::WetTissue => "Wet tissue",
            StaffRequest::Cutlery => "Cutlery",
            StaffRequest::StaffOnly => "Staff call",
            StaffRequest::Custom(text) => text.trim(),
        }
    }
}

/// Body of `POST /stores/{store_id}/calls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffCallRequest {
    pub table_id: i64,
    pub message: String,
}

pub async fn call_staff(
    backend: &dyn Backend,
    store_id: i64,
    table_id: i64,
    request: &StaffRequest,
) -> Result<(), ApiError> {
    let body = StaffCallRequest {
        table_id,
        message: request.message().to_string(),
    };
    backend.call_staff(store_id, &body).await?;
    info!(store_id, table_id, message = %body.message, "Staff called");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;

    fn bibimbap() -> MenuChoice {
        MenuChoice {
            menu_id: 1,
            name: "Bibimbap".to_string(),
            price: 9_000,
            ..MenuChoice::default()
        }
    }

    fn menu_option(id: i64, name: &str, price: i64) -> MenuOption {
        MenuOption {
            id,
            name: name.to_string(),
            price,
            is_default: false,
        }
    }

    /// Size: required single-select with a default. Toppings: up to two.
    /// Sauce: required single-select without a default. Extras: optional,
    /// unlimited.
    fn ramen() -> MenuChoice {
        MenuChoice {
            menu_id: 2,
            name: "Ramen".to_string(),
            price: 8_000,
            is_sold_out: false,
            option_groups: vec![
                OptionGroup {
                    id: 20,
                    name: "Toppings".to_string(),
                    order_index: 2,
                    max_select: 2,
                    options: vec![
                        menu_option(21, "Egg", 500),
                        menu_option(22, "Cheese", 700),
                        menu_option(23, "Corn", 300),
                    ],
                    ..OptionGroup::default()
                },
                OptionGroup {
                    id: 10,
                    name: "Size".to_string(),
                    order_index: 1,
                    is_required: true,
                    is_single_select: true,
                    options: vec![
                        menu_option(11, "Regular", 0),
                        MenuOption {
                            is_default: true,
                            ..menu_option(12, "Large", 1_000)
                        },
                    ],
                    ..OptionGroup::default()
                },
                OptionGroup {
                    id: 30,
                    name: "Sauce".to_string(),
                    order_index: 3,
                    is_required: true,
                    is_single_select: true,
                    options: vec![menu_option(31, "Mild", 0), menu_option(32, "Hot", 0)],
                    ..OptionGroup::default()
                },
                OptionGroup {
                    id: 40,
                    name: "Extras".to_string(),
                    order_index: 4,
                    options: vec![menu_option(41, "Rice", 1_000)],
                    ..OptionGroup::default()
                },
            ],
        }
    }

    fn opt(id: i64, group: Option<&str>, name: &str, price: i64) -> SelectedOption {
        SelectedOption {
            id,
            name: name.to_string(),
            price,
            group_name: group.map(str::to_string),
        }
    }

    #[test]
    fn test_describe_options_groups_consecutive_entries() {
        let options = vec![
            opt(1, Some("Size"), "Large", 1_000),
            opt(2, Some("Toppings"), "Egg", 500),
            opt(3, Some("Toppings"), "Cheese", 500),
            opt(4, None, "No onion", 0),
        ];
        assert_eq!(
            describe_options(&options),
            "Size - Large\nToppings - Egg, Cheese\nOptions - No onion"
        );
        assert_eq!(describe_options(&[]), "");
    }

    #[test]
    fn test_same_menu_and_options_merge_regardless_of_order() {
        let mut cart = Cart::new();
        let a = cart.add(
            &bibimbap(),
            vec![opt(2, Some("T"), "Egg", 500), opt(1, Some("S"), "Large", 1_000)],
        )
        .expect("add");
        let b = cart.add(
            &bibimbap(),
            vec![opt(1, Some("S"), "Large", 1_000), opt(2, Some("T"), "Egg", 500)],
        )
        .expect("add");
        let c = cart.add(&bibimbap(), vec![]).expect("add");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.lines()[0].quantity, 2);
        assert_eq!(cart.lines()[0].unit_price, 10_500);
        assert_eq!(cart.total(), 2 * 10_500 + 9_000);
    }

    #[test]
    fn test_quantity_update_removes_empty_lines() {
        let mut cart = Cart::new();
        let line = cart.add(&bibimbap(), vec![]).expect("add");
        assert!(cart.update_quantity(line, 2));
        assert_eq!(cart.lines()[0].quantity, 3);
        assert!(cart.update_quantity(line, -5));
        assert!(cart.is_empty());
        assert!(!cart.update_quantity(line, 1));
    }

    #[test]
    fn test_sold_out_menu_cannot_be_added() {
        let sold_out = MenuChoice {
            is_sold_out: true,
            ..bibimbap()
        };
        let mut cart = Cart::new();
        assert_eq!(
            cart.add(&sold_out, vec![]),
            Err(SelectionError::SoldOut("Bibimbap".to_string()))
        );
        assert!(matches!(
            OptionSelection::open(&sold_out),
            Err(SelectionError::SoldOut(_))
        ));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_open_preselects_defaults() {
        let menu = ramen();
        let sheet = OptionSelection::open(&menu).expect("open");
        // Size default, Sauce falls back to its first option, others empty.
        assert!(sheet.is_selected(12));
        assert!(!sheet.is_selected(11));
        assert!(sheet.is_selected(31));
        assert!(!sheet.is_selected(21));
        assert!(!sheet.is_selected(41));
        assert_eq!(sheet.unit_price(), 9_000);
    }

    #[test]
    fn test_single_select_replaces_previous_pick() {
        let menu = ramen();
        let mut sheet = OptionSelection::open(&menu).expect("open");
        sheet.toggle(10, 11).expect("pick regular");
        assert!(sheet.is_selected(11));
        assert!(!sheet.is_selected(12));

        // Re-picking the current radio keeps it selected.
        sheet.toggle(10, 11).expect("same pick");
        assert!(sheet.is_selected(11));
    }

    #[test]
    fn test_max_select_caps_multi_select_group() {
        let menu = ramen();
        let mut sheet = OptionSelection::open(&menu).expect("open");
        sheet.toggle(20, 21).expect("egg");
        sheet.toggle(20, 22).expect("cheese");
        assert_eq!(
            sheet.toggle(20, 23),
            Err(SelectionError::TooMany {
                group: "Toppings".to_string(),
                max: 2
            })
        );
        assert!(!sheet.is_selected(23));

        // Unpicking frees a slot.
        sheet.toggle(20, 21).expect("drop egg");
        sheet.toggle(20, 23).expect("corn");
        assert!(sheet.is_selected(23));

        // Uncapped group takes anything.
        sheet.toggle(40, 41).expect("rice");
        assert_eq!(
            sheet.toggle(10, 21),
            Err(SelectionError::UnknownOption(21))
        );
    }

    #[test]
    fn test_selection_lands_in_cart_in_group_order() {
        let menu = ramen();
        let mut sheet = OptionSelection::open(&menu).expect("open");
        sheet.toggle(20, 22).expect("cheese");

        let mut cart = Cart::new();
        cart.add_selection(&sheet).expect("add");
        let line = &cart.lines()[0];
        assert_eq!(line.unit_price, 8_000 + 1_000 + 700);
        assert_eq!(
            describe_options(&line.options),
            "Size - Large\nToppings - Cheese\nSauce - Mild"
        );
    }

    #[test]
    fn test_required_group_must_have_a_pick() {
        let menu = ramen();
        let mut cart = Cart::new();
        let size_only = vec![opt(12, Some("Size"), "Large", 1_000)];
        assert_eq!(
            cart.add(&menu, size_only),
            Err(SelectionError::Required {
                group: "Sauce".to_string()
            })
        );

        let two_sizes = vec![
            opt(11, Some("Size"), "Regular", 0),
            opt(12, Some("Size"), "Large", 1_000),
            opt(31, Some("Sauce"), "Mild", 0),
        ];
        assert!(matches!(
            cart.add(&menu, two_sizes),
            Err(SelectionError::TooMany { max: 1, .. })
        ));
        assert!(matches!(
            cart.add(&menu, vec![opt(99, None, "Ghost", 0)]),
            Err(SelectionError::UnknownOption(99))
        ));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_menu_decodes_backend_shape() {
        let menu: MenuChoice = serde_json::from_value(serde_json::json!({
            "id": 5,
            "name": "Tteokbokki",
            "price": 7000,
            "is_sold_out": true,
            "option_groups": [{
                "id": 1,
                "name": "Spice",
                "is_required": true,
                "is_single_select": true,
                "options": [{ "id": 2, "name": "Hot", "price": 0, "is_default": true }]
            }]
        }))
        .expect("decode");
        assert_eq!(menu.menu_id, 5);
        assert!(menu.is_sold_out);
        assert!(menu.option_groups[0].options[0].is_default);
        assert_eq!(menu.option_groups[0].max_select, 0);
    }

    #[test]
    fn test_submission_from_empty_cart_is_rejected() {
        assert!(matches!(
            OrderSubmission::from_cart(1, 2, &Cart::new()),
            Err(SubmitError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_submit_order_sends_option_description() {
        let backend = FakeBackend::new();
        let mut cart = Cart::new();
        cart.add(&bibimbap(), vec![opt(3, Some("Spice"), "Mild", 0)])
            .expect("add");

        let submitted = submit_order(&backend, 4, 12, &cart).await.expect("submit");
        assert_eq!(submitted.display_number, Some(17));

        let sent = backend.submissions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].store_id, 4);
        assert_eq!(sent[0].table_id, 12);
        assert_eq!(sent[0].items[0].options_desc, "Spice - Mild");
        assert_eq!(sent[0].items[0].price, 9_000);
    }

    #[tokio::test]
    async fn test_call_staff_uses_preset_message() {
        let backend = FakeBackend::new();
        call_staff(&backend, 4, 12, &StaffRequest::Water)
            .await
            .expect("call");
        call_staff(&backend, 4, 12, &StaffRequest::Custom("  more kimchi ".to_string()))
            .await
            .expect("call");

        let calls = backend.staff_calls();
        assert_eq!(calls[0].1.message, "Water");
        assert_eq!(calls[1].1.message, "more kimchi");
        assert_eq!(calls[1].0, 4);
    }
}
