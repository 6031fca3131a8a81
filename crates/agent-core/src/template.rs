//! Prompt templates
//!
//! `{name}` placeholders are filled in one left-to-right pass. Inserted
//! values are never scanned again, so a task or model result that happens
//! to contain `{history}` or `{result}` reaches the model verbatim.

/// Fill `{key}` placeholders from `values`
///
/// Braces that do not enclose a known key (JSON examples in the prompt,
/// for instance) are copied through unchanged.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let matched = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match matched {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
