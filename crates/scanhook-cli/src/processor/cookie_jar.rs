/// Minimal cookie store for one ticketing session.
///
/// Keyed by cookie name, last value wins, insertion order kept for the
/// `Cookie` header. Attributes (path, expiry, ...) are ignored.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Vec<(String, String)>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one `Set-Cookie` header value.
    pub fn set_from_header(&mut self, set_cookie: &str) {
        let first = set_cookie.split(';').next().unwrap_or_default();
        let Some((name, value)) = first.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let value = value.trim().to_string();

        match self.cookies.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.cookies.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// `Cookie` request header value.
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_name_value_and_drops_attributes() {
        let mut jar = CookieJar::new();
        jar.set_from_header("LWSSO_COOKIE_KEY=abc; Path=/; HttpOnly");
        jar.set_from_header("XSRF-TOKEN=tok=with=equals; Path=/qcbin");

        assert_eq!(jar.get("LWSSO_COOKIE_KEY"), Some("abc"));
        assert_eq!(jar.get("XSRF-TOKEN"), Some("tok=with=equals"));
        assert_eq!(
            jar.header_value(),
            "LWSSO_COOKIE_KEY=abc; XSRF-TOKEN=tok=with=equals"
        );
    }

    #[test]
    fn later_values_replace_in_place() {
        let mut jar = CookieJar::new();
        jar.set_from_header("A=1");
        jar.set_from_header("B=2");
        jar.set_from_header("A=3");

        assert_eq!(jar.header_value(), "A=3; B=2");
    }

    #[test]
    fn malformed_headers_are_ignored() {
        let mut jar = CookieJar::new();
        jar.set_from_header("no-equals-sign");
        jar.set_from_header("=orphan");
        jar.set_from_header("");

        assert_eq!(jar.header_value(), "");
        assert_eq!(jar.get("orphan"), None);
    }
}
