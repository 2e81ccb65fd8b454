//! System instruction for the storefront agent.

use crate::catalog::GroundedCatalog;
use crate::catalog::model::Tenant;
use crate::language::Language;

/// The one shape the agent may emit to place an order.
pub const ORDER_SCHEMA: &str = r#"{"action": "create_order", "customer_name": "...", "items": [{"product": "...", "quantity": 1, "price": 100}], "address": "..."}"#;

const DEFAULT_LOCATION: &str = "India";
const DEFAULT_TONE: &str = "Be warm, friendly and conversational, not robotic. Use emojis naturally 🙏";

/// Builds the system instruction for one turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    /// Use the tenant's precomputed prompt verbatim if it has one, otherwise
    /// build one around the grounded catalog.
    pub fn compose(&self, tenant: &Tenant, language: Language, catalog: &GroundedCatalog) -> String {
        match tenant.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(cached) => cached.to_string(),
            None => self.build(tenant, language, &catalog.text),
        }
    }

    /// Build a prompt from tenant profile, language and rendered catalog.
    pub fn build(&self, tenant: &Tenant, language: Language, inventory: &str) -> String {
        let mut out = String::with_capacity(1024 + inventory.len());

        let category = tenant.category.as_deref().unwrap_or("shop");
        let location = tenant.location.as_deref().unwrap_or(DEFAULT_LOCATION);
        out.push_str(&format!(
            "You are a helpful WhatsApp assistant for \"{}\", a {category} located in {location}.\n",
            tenant.name
        ));
        if let Some(description) = tenant.description.as_deref().filter(|d| !d.trim().is_empty()) {
            out.push_str(description.trim());
            out.push('\n');
        }
        let tone = tenant.tone.as_deref().filter(|t| !t.trim().is_empty());
        out.push_str(&format!("\nTONE: {}\n", tone.unwrap_or(DEFAULT_TONE)));

        out.push_str(&format!("\n{}\n", language.instruction()));

        out.push_str(&format!("\nAVAILABLE INVENTORY:\n{inventory}\n"));

        out.push_str(
            "\nYOUR CAPABILITIES:\n\
             1. Answer product availability questions by checking the inventory\n\
             2. Tell prices when asked\n\
             3. Take orders: collect product, quantity, customer name and delivery address\n\
             4. Answer general questions about the business\n",
        );

        out.push_str(&format!(
            "\nORDER FLOW:\n\
             - Collect ALL details before confirming an order\n\
             - Once you have product, quantity, name and address, place the order\n\
             - To place the order, output exactly one JSON block in this shape and no other:\n\
             ```json\n{ORDER_SCHEMA}\n```\n"
        ));

        out.push_str(
            "\nRULES:\n\
             - Never mention or offer a product that is not in AVAILABLE INVENTORY\n\
             - Only quote prices listed in AVAILABLE INVENTORY\n\
             - If a price is on request, ask the customer to contact the shop for pricing\n\
             - If a product is not found, suggest similar items from the inventory\n\
             - Keep messages SHORT (under 200 words)\n\
             - If the customer switches language, switch with them\n",
        );
        out
    }
}
