//! Display names for guests
//!
//! `home_assistant` on lxc 101 becomes `Home Assistant LXC`; an unnamed qemu
//! guest 100 becomes `Qemu 100 VM`.

/// Friendly name shown as the Home Assistant device name of a guest
pub fn friendly_name(id: &str, raw_name: Option<&str>, kind_tag: &str) -> String {
    let base = match raw_name {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => format!("{kind_tag} {id}"),
    };
    let spaced = base.replace(['_', '-'], " ");
    let suffix = if kind_tag == "qemu" { "VM" } else { "LXC" };
    format!("{} {}", title_case(&spaced), suffix)
}

/// Uppercases the first letter of every word and lowercases the rest.
/// A word starts after any non-alphabetic character, so `k8s` reads `K8S`.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnamed_guest() {
        assert_eq!(friendly_name("100", None, "qemu"), "Qemu 100 VM");
        assert_eq!(friendly_name("105", None, "lxc"), "Lxc 105 LXC");
        assert_eq!(friendly_name("106", Some(""), "lxc"), "Lxc 106 LXC");
    }

    #[test]
    fn test_named_guest() {
        assert_eq!(
            friendly_name("101", Some("home_assistant"), "lxc"),
            "Home Assistant LXC"
        );
        assert_eq!(friendly_name("102", Some("pi-hole"), "lxc"), "Pi Hole LXC");
        assert_eq!(friendly_name("103", Some("HAOS"), "qemu"), "Haos VM");
    }

    #[test]
    fn test_title_case_word_boundaries() {
        assert_eq!(title_case("k8s node"), "K8S Node");
        assert_eq!(title_case("plex  media"), "Plex  Media");
    }
}
