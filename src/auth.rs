/// Built-in SASL authentication mechanisms.
///
/// The [`default`](#impl-Default) implementation creates an [`Auth::Plain`](#variant.Plain)
/// variant with the username and password both set to `guest`.
///
/// SASL mechanisms that require AMQP secure / secure-ok exchanges are not supported.
#[derive(Debug, Clone, PartialEq)]
pub enum Auth {
    /// PLAIN authentication via a username and password.
    Plain { username: String, password: String },

    /// EXTERNAL authentication, typically supported via TLS client certificates.
    External,
}

impl Default for Auth {
    fn default() -> Auth {
        Auth::Plain {
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

impl Auth {
    /// The SASL mechanism name reported to the server.
    pub fn mechanism(&self) -> &'static str {
        match self {
            Auth::Plain { .. } => "PLAIN",
            Auth::External => "EXTERNAL",
        }
    }

    pub(crate) fn response(&self) -> String {
        match self {
            Auth::Plain { username, password } => format!("\x00{}\x00{}", username, password),
            Auth::External => "".to_string(),
        }
    }

    /// Pick the mechanism to use against a server offering the space-separated `offered` list.
    ///
    /// The configured mechanism wins if the server offers it. Otherwise EXTERNAL is used when
    /// offered, since it needs no credentials from us.
    pub(crate) fn negotiate(&self, offered: &str) -> Option<Auth> {
        let offers = |mechanism: &str| offered.split(' ').any(|m| m == mechanism);
        if offers(self.mechanism()) {
            Some(self.clone())
        } else if offers(Auth::External.mechanism()) {
            Some(Auth::External)
        } else {
            None
        }
    }
}
