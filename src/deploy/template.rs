use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Replace `{{.KEY}}` placeholders; unknown keys render empty
pub fn render(template: &str, values: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match values.get(key) {
                Some(value) => value.clone(),
                None => {
                    warn!("⚠️ No value for manifest placeholder {}", key);
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Non-empty documents of a `---` separated stream
pub fn split_documents(source: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in source.lines() {
        if line.trim_end() == "---" {
            documents.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    documents.push(current);

    documents
        .into_iter()
        .filter(|doc| {
            doc.lines()
                .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        })
        .collect()
}

/// Resource name for a kind: `Deployment` -> `deployments`, `Ingress` -> `ingresses`
pub fn pluralise_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some(stem) = lower.strip_suffix('y') {
        let after_vowel = stem
            .chars()
            .last()
            .map(|c| "aeiou".contains(c))
            .unwrap_or(false);
        if !after_vowel {
            return format!("{}ies", stem);
        }
    }

    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{}es", lower);
    }
    format!("{}s", lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_keys() {
        let values = HashMap::from([
            ("CONTAINER_IMAGE".to_string(), "quay.io/team/web:1.0".to_string()),
            ("PORT".to_string(), "8080".to_string()),
        ]);
        let out = render(
            "image: {{.CONTAINER_IMAGE}}\nport: {{ .PORT }}\nname: {{.MISSING}}x\n",
            &values,
        );
        assert_eq!(out, "image: quay.io/team/web:1.0\nport: 8080\nname: x\n");
    }

    #[test]
    fn test_render_reuses_pattern_across_documents() {
        let values = HashMap::from([("PORT".to_string(), "8080".to_string())]);
        assert_eq!(PLACEHOLDER.captures_len(), 2);
        for _ in 0..3 {
            assert_eq!(render("{{.PORT}}{{.PORT}} {{ PORT }}", &values), "80808080 {{ PORT }}");
        }
        assert_eq!(render("no placeholders", &values), "no placeholders");
    }

    #[test]
    fn test_split_documents() {
        let docs = split_documents("kind: A\n---\n\n---\n# only a comment\n---\nkind: B\n");
        assert_eq!(docs, vec!["kind: A\n".to_string(), "kind: B\n".to_string()]);
        assert!(split_documents("").is_empty());
    }

    #[test]
    fn test_pluralise_kind() {
        assert_eq!(pluralise_kind("Deployment"), "deployments");
        assert_eq!(pluralise_kind("Service"), "services");
        assert_eq!(pluralise_kind("Ingress"), "ingresses");
        assert_eq!(pluralise_kind("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralise_kind("Gateway"), "gateways");
        assert_eq!(pluralise_kind("Route"), "routes");
    }
}
