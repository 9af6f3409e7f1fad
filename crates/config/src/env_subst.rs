/// Replace `${ENV_VAR}` placeholders with values from the process environment.
///
/// Unknown variables and unterminated placeholders are kept verbatim.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match lookup(name).filter(|_| is_var_name(name)) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "CLAW_TOKEN" => Some("tok-123".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn replaces_known_variables() {
        assert_eq!(
            substitute_with("clawToken = \"${CLAW_TOKEN}\"", lookup),
            "clawToken = \"tok-123\""
        );
    }

    #[test]
    fn keeps_unknown_variables() {
        assert_eq!(substitute_with("${NOPE}/x", lookup), "${NOPE}/x");
    }

    #[test]
    fn empty_value_is_substituted() {
        assert_eq!(substitute_with("a${EMPTY}b", lookup), "ab");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_with("x ${CLAW_TOKEN", lookup), "x ${CLAW_TOKEN");
    }

    #[test]
    fn invalid_names_are_left_alone() {
        assert_eq!(substitute_with("${a b}", |_| Some("v".into())), "${a b}");
    }

    #[test]
    fn multiple_placeholders() {
        assert_eq!(
            substitute_with("${CLAW_TOKEN}:${CLAW_TOKEN}", lookup),
            "tok-123:tok-123"
        );
    }
}
