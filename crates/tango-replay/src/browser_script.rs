//! JavaScript snippets evaluated in page context.
//!
//! Values are embedded as JSON literals so any text (quotes, newlines,
//! non-ASCII) survives the trip into the page unchanged.

use crate::engine::TextMatch;

/// Function declaration applied with `this` bound to the target element.
pub const SCROLL_INTO_CENTER_FN: &str =
    "function() { this.scrollIntoView({ behavior: 'instant', block: 'center', inline: 'center' }); }";

/// Function declaration invoking the element's own `click()`.
pub const PROGRAMMATIC_CLICK_FN: &str = "function() { this.click(); }";

/// Function declaration returning the element's rendered text.
pub const TEXT_FN: &str = "function() { return this.innerText ?? this.textContent ?? ''; }";

/// Function declaration returning the viewport point a pointer click would
/// land on, and whether something else sits on top of the element there.
pub const CLICK_POINT_FN: &str = r#"function() {
    const rect = this.getBoundingClientRect();
    const x = rect.left + rect.width / 2;
    const y = rect.top + rect.height / 2;
    const hit = document.elementFromPoint(x, y);
    return { x, y, covered: !hit || !(hit === this || this.contains(hit)) };
}"#;

/// Load progress: whether the document finished loading, and how many
/// resources it has requested so far.
pub const LOAD_STATE_EXPR: &str = "({ ready: document.readyState === 'complete', resources: performance.getEntriesByType('resource').length })";

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Array of the elements matching `css`, narrowed to those whose text passes
/// `text`, in document order.
fn element_list(css: &str, text: Option<&TextMatch>) -> String {
    const TEXT: &str = "(el.innerText ?? el.textContent ?? '')";
    let filter = match text {
        None => return format!("Array.from(document.querySelectorAll({}))", js_string(css)),
        Some(TextMatch::Contains(needle)) => {
            format!("{TEXT}.toLowerCase().includes({})", js_string(needle))
        }
        Some(TextMatch::Equals(needle)) => {
            format!("{TEXT}.trim().toLowerCase() === {}", js_string(needle))
        }
    };
    format!(
        "Array.from(document.querySelectorAll({})).filter(el => {filter})",
        js_string(css)
    )
}

/// Expression counting the elements matching `css` and `text`.
pub fn count_expr(css: &str, text: Option<&TextMatch>) -> String {
    format!("{}.length", element_list(css, text))
}

/// Expression applying `function` to the `index`-th element matching `css`
/// and `text`. Evaluates to `{ attached: false }` when there is no such
/// element, otherwise to `{ attached: true, value }` with the function's
/// return value.
pub fn on_element_expr(css: &str, text: Option<&TextMatch>, index: usize, function: &str) -> String {
    format!(
        "(() => {{\n    const el = {list}[{index}];\n    if (!el) return {{ attached: false }};\n    return {{ attached: true, value: ({function}).call(el) }};\n}})()",
        list = element_list(css, text),
    )
}

/// Writes through the prototype's native `value` setter, bypassing any
/// instance-level interception, then fires a bubbling `input` event so
/// framework listeners pick the change up.
const NATIVE_SETTER_BODY: &str = r#"
    const proto = el instanceof HTMLTextAreaElement
        ? HTMLTextAreaElement.prototype
        : el instanceof HTMLSelectElement
            ? HTMLSelectElement.prototype
            : HTMLInputElement.prototype;
    const descriptor = Object.getOwnPropertyDescriptor(proto, 'value');
    if (descriptor && descriptor.set && el instanceof proto.constructor) {
        descriptor.set.call(el, value);
    } else {
        el.value = value;
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
"#;

/// Function declaration (bound to the element) that sets a controlled value.
pub fn controlled_value_fn(text: &str) -> String {
    format!(
        "function() {{\n    const el = this;\n    const value = {value};\n    el.focus();{body}}}",
        value = js_string(text),
        body = NATIVE_SETTER_BODY,
    )
}

/// Expression setting a controlled value on `document.activeElement`.
///
/// Evaluates to `false` when nothing but the document body holds focus.
pub fn focused_value_expr(text: &str) -> String {
    format!(
        "(() => {{\n    const el = document.activeElement;\n    if (!el || el === document.body || el === document.documentElement) return false;\n    const value = {value};{body}    return true;\n}})()",
        value = js_string(text),
        body = NATIVE_SETTER_BODY,
    )
}
