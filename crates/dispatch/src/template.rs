//! Per-item message templating.

/// Placeholder substituted with the item's document code.
pub const CODE_PLACEHOLDER: &str = "{code}";

/// Render the outbound message for one item: substitute `{code}` when the
/// template carries it, otherwise append the code as a suffix so the
/// recipient can always identify the document.
pub fn render_message(template: &str, code: &str) -> String {
    if template.contains(CODE_PLACEHOLDER) {
        template.replace(CODE_PLACEHOLDER, code)
    } else {
        format!("{template} (Código: {code})")
    }
}
