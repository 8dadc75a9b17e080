use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

/// Render `key=value` pairs as a label selector string, e.g. `app=notebook,tier=web`.
pub fn match_labels_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a structured `LabelSelector` as the string form accepted by list calls.
pub fn label_selector_string(selector: &LabelSelector) -> String {
    let mut terms = Vec::new();
    if let Some(labels) = &selector.match_labels {
        if !labels.is_empty() {
            terms.push(match_labels_string(labels));
        }
    }
    for expression in selector.match_expressions.iter().flatten() {
        let values = expression.values.clone().unwrap_or_default().join(",");
        let term = match expression.operator.as_str() {
            "In" => format!("{} in ({})", expression.key, values),
            "NotIn" => format!("{} notin ({})", expression.key, values),
            "Exists" => expression.key.clone(),
            "DoesNotExist" => format!("!{}", expression.key),
            _ => continue,
        };
        terms.push(term);
    }
    terms.join(",")
}
