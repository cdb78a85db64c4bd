//! Recovers a single HTML document from a free-form model reply.
//!
//! Rules are tried in order and the first hit wins:
//! an ```` ```html ```` fence, any ```` ``` ```` fence, a `<!DOCTYPE` ... last `</html>` span,
//! and finally the whole reply. Purely textual: nothing here checks that the
//! result is well-formed HTML.

const FENCE: &str = "```";
const HTML_FENCE: &str = "```html";
const DOCTYPE: &str = "<!DOCTYPE";
const CLOSING_ROOT: &str = "</html>";

pub fn extract_html(reply: &str) -> String {
    fenced_block(reply, HTML_FENCE)
        .or_else(|| fenced_block(reply, FENCE))
        .or_else(|| doctype_span(reply))
        .unwrap_or(reply)
        .trim()
        .to_string()
}

/// Text after the first `opener` up to the next fence. An unterminated fence runs to the end.
fn fenced_block<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    let end = rest.find(FENCE).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// From the doctype to the *last* closing root tag, inclusive.
fn doctype_span(text: &str) -> Option<&str> {
    let start = text.find(DOCTYPE)?;
    let end = text.rfind(CLOSING_ROOT)? + CLOSING_ROOT.len();
    (end > start).then(|| &text[start..end])
}
