//! Stable test identity strings.
//!
//! A slug is derived from the explicit id when one is given, otherwise from the
//! test name, and is prefixed with the suite's dot-separated prefix.

pub const MAX_SLUG_LENGTH: usize = 512;

/// Lowercase, drop everything outside `[a-z0-9._-]`, collapse dash runs, and
/// trim dashes from both ends. Whitespace becomes a dash before filtering so
/// word boundaries survive.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        let mapped = if ch.is_whitespace() { '-' } else { ch };
        match mapped {
            '-' => {
                if !last_dash {
                    slug.push('-');
                    last_dash = true;
                }
            }
            'a'..='z' | '0'..='9' | '.' | '_' => {
                slug.push(mapped);
                last_dash = false;
            }
            _ => {}
        }
    }

    slug.trim_matches('-').to_string()
}

/// Compose the final slug for a test, truncated to [`MAX_SLUG_LENGTH`].
pub fn test_slug(prefix: Option<&str>, explicit_id: Option<&str>, name: &str) -> String {
    let base = slugify(explicit_id.unwrap_or(name));
    let composed = match prefix.map(str::trim).filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => format!("{prefix}.{base}"),
        None => base,
    };
    truncate(composed, MAX_SLUG_LENGTH)
}

fn truncate(mut value: String, max_chars: usize) -> String {
    if let Some((byte_index, _)) = value.char_indices().nth(max_chars) {
        value.truncate(byte_index);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_becomes_kebab_case() {
        assert_eq!(test_slug(None, None, "Should Fetch User Data"), "should-fetch-user-data");
    }

    #[test]
    fn explicit_id_wins_over_name() {
        assert_eq!(
            test_slug(None, Some("Custom ID with Spaces"), "ignored name"),
            "custom-id-with-spaces"
        );
    }

    #[test]
    fn prefix_is_joined_with_a_dot() {
        assert_eq!(test_slug(Some("api.users"), Some("create"), "Create a user"), "api.users.create");
    }

    #[test]
    fn strips_punctuation_and_collapses_dashes() {
        assert_eq!(slugify("  GET /users/{id} -- returns 404!  "), "get-usersid-returns-404");
        assert_eq!(slugify("a---b"), "a-b");
    }

    #[test]
    fn keeps_dots_and_underscores() {
        assert_eq!(slugify("v1.2 snake_case Name"), "v1.2-snake_case-name");
    }

    #[test]
    fn drops_non_ascii_letters() {
        assert_eq!(slugify("Crème Brûlée"), "crme-brle");
    }

    #[test]
    fn composed_slug_is_truncated() {
        let long = "x".repeat(600);
        let slug = test_slug(Some("suite"), None, &long);
        assert_eq!(slug.chars().count(), MAX_SLUG_LENGTH);
        assert!(slug.starts_with("suite.x"));
    }
}
