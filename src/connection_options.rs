use crate::errors::*;
use crate::serialize::short_string;
use crate::Auth;
use amq_protocol::protocol::connection::{Open, Start, StartOk, Tune, TuneOk};
use amq_protocol::protocol::constants::FRAME_MIN_SIZE;
use amq_protocol::types::{AMQPValue, FieldTable};
use std::time::Duration;

/// Options that control the overall AMQP connection.
///
/// `ConnectionOptions` uses the builder pattern. The default settings are equivalent to
///
/// ```rust
/// use amqpsync::{Auth, ConnectionOptions};
/// use std::time::Duration;
///
/// # fn default_connection_options() -> ConnectionOptions {
/// ConnectionOptions::default()
///     .host("localhost")
///     .port(5672)
///     .auth(Auth::default())
///     .virtual_host("/")
///     .locale("en_US")
///     .channel_max(65535)
///     .frame_max(131_072)
///     .heartbeat(60)
///     .socket_timeout(Duration::from_secs(10))
///     .rpc_timeout(Duration::from_secs(30))
///     .channel_rpc_timeout(Duration::from_secs(360))
///     .poll_interval(Duration::from_millis(100))
///     .information(None)
/// # }
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) auth: Auth,
    pub(crate) virtual_host: String,
    pub(crate) locale: String,
    pub(crate) channel_max: u16,
    pub(crate) frame_max: u32,
    pub(crate) heartbeat: u16,
    pub(crate) socket_timeout: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) channel_rpc_timeout: Duration,
    pub(crate) poll_interval: Duration,
    information: Option<String>,
}

impl Default for ConnectionOptions {
    // NOTE: If we change this, make sure to change the doc comment above.
    fn default() -> Self {
        ConnectionOptions {
            host: "localhost".to_string(),
            port: 5672,
            auth: Auth::default(),
            virtual_host: "/".to_string(),
            locale: "en_US".to_string(),
            channel_max: 65535,
            frame_max: 131_072,
            heartbeat: 60,
            socket_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(30),
            channel_rpc_timeout: Duration::from_secs(360),
            poll_interval: Duration::from_millis(100),
            information: None,
        }
    }
}

impl ConnectionOptions {
    /// Sets the server hostname or IP address.
    pub fn host<T: Into<String>>(self, host: T) -> Self {
        ConnectionOptions {
            host: host.into(),
            ..self
        }
    }

    /// Sets the server port.
    pub fn port(self, port: u16) -> Self {
        ConnectionOptions { port, ..self }
    }

    /// Sets the SASL authentication method.
    pub fn auth(self, auth: Auth) -> Self {
        ConnectionOptions { auth, ..self }
    }

    /// Sets the AMQP virtual host.
    pub fn virtual_host<T: Into<String>>(self, virtual_host: T) -> Self {
        ConnectionOptions {
            virtual_host: virtual_host.into(),
            ..self
        }
    }

    /// Sets the locale. AMQP requires servers support the `en_US` locale (which is also the
    /// default locale for `ConnectionOptions`).
    pub fn locale<T: Into<String>>(self, locale: T) -> Self {
        ConnectionOptions {
            locale: locale.into(),
            ..self
        }
    }

    /// Sets the maximum number of channels that can be opened simultaneously on this connection.
    /// If the server proposes a nonzero value, the lower of the two is used. Setting this value
    /// to 0 means to let the server choose.
    pub fn channel_max(self, channel_max: u16) -> Self {
        ConnectionOptions {
            channel_max,
            ..self
        }
    }

    /// Sets the maximum size in bytes of frames used for this connection. If the server proposes
    /// a nonzero value, the lower of the two is used.
    ///
    /// The frame max setting says nothing about the maximum size of messages; messages larger than
    /// `frame_max` bytes will be broken up into multiple frames.
    ///
    /// Note that AMQP specifies a minimum frame_max of 4096; attempting to set a value lower than
    /// this will result in an error when attempting to open the connection.
    pub fn frame_max(self, frame_max: u32) -> Self {
        ConnectionOptions { frame_max, ..self }
    }

    /// Sets the heartbeat interval in seconds. Setting this value to 0 disables heartbeats. If
    /// this value is greater than 0 but different than the server's requested heartbeat interval,
    /// the lower of the two will be used.
    pub fn heartbeat(self, heartbeat: u16) -> Self {
        ConnectionOptions { heartbeat, ..self }
    }

    /// Sets the timeout for establishing the TCP connection and for individual socket writes.
    pub fn socket_timeout(self, socket_timeout: Duration) -> Self {
        ConnectionOptions {
            socket_timeout,
            ..self
        }
    }

    /// Sets how long connection-level operations (the handshake and `Connection::close`) wait
    /// for the server.
    pub fn rpc_timeout(self, rpc_timeout: Duration) -> Self {
        ConnectionOptions {
            rpc_timeout,
            ..self
        }
    }

    /// Sets the default time a channel waits for the reply to a synchronous request. Individual
    /// channels can override this via `Connection::channel_with_rpc_timeout`.
    pub fn channel_rpc_timeout(self, channel_rpc_timeout: Duration) -> Self {
        ConnectionOptions {
            channel_rpc_timeout,
            ..self
        }
    }

    /// Sets how long a single socket read may block. This bounds how quickly the I/O thread
    /// notices the connection shutting down.
    pub fn poll_interval(self, poll_interval: Duration) -> Self {
        ConnectionOptions {
            poll_interval,
            ..self
        }
    }

    /// Sets the "information" string reported during handshaking to the server. This string
    /// is displayed in the RabbitMQ management interface under "Client properties" of a
    /// connection.
    pub fn information(self, information: Option<String>) -> Self {
        ConnectionOptions {
            information,
            ..self
        }
    }

    /// Check every option locally; nothing is sent to the server if this fails.
    pub fn validate(&self) -> Result<()> {
        fn require(ok: bool, parameter: &'static str, expected: &'static str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                InvalidArgumentSnafu {
                    parameter,
                    expected,
                }
                .fail()
            }
        }

        require(!self.host.is_empty(), "host", "a non-empty string")?;
        require(self.port != 0, "port", "a nonzero integer")?;
        short_string("virtual_host", &self.virtual_host)?;
        short_string("locale", &self.locale)?;
        require(
            self.frame_max == 0 || self.frame_max >= u32::from(FRAME_MIN_SIZE),
            "frame_max",
            "0 or at least 4096",
        )?;
        let zero = Duration::from_secs(0);
        require(self.socket_timeout > zero, "socket_timeout", "a nonzero duration")?;
        require(self.rpc_timeout > zero, "rpc_timeout", "a nonzero duration")?;
        require(
            self.channel_rpc_timeout > zero,
            "channel_rpc_timeout",
            "a nonzero duration",
        )?;
        require(self.poll_interval > zero, "poll_interval", "a nonzero duration")?;
        if let Auth::Plain { username, password } = &self.auth {
            require(!username.is_empty(), "username", "a non-empty string")?;
            require(password.len() <= 255, "password", "at most 255 bytes")?;
        }
        Ok(())
    }

    pub(crate) fn make_start_ok(&self, start: Start) -> Result<(StartOk, FieldTable)> {
        let auth = match self.auth.negotiate(&start.mechanisms) {
            Some(auth) => auth,
            None => {
                return UnsupportedAuthMechanismSnafu {
                    available: start.mechanisms.clone(),
                    requested: self.auth.mechanism(),
                }
                .fail()
            }
        };
        if !start.locales.split(' ').any(|l| l == self.locale) {
            return UnsupportedLocaleSnafu {
                available: start.locales.clone(),
                requested: self.locale.clone(),
            }
            .fail();
        }

        // bundle up info about this crate as client properties
        let mut client_properties = FieldTable::new();
        let mut set_prop = |k: &str, v: String| {
            client_properties.insert(k.to_string(), AMQPValue::LongString(v));
        };
        set_prop("product", crate::built_info::PKG_NAME.to_string());
        set_prop("version", crate::built_info::PKG_VERSION.to_string());
        set_prop(
            "platform",
            format!(
                "{} / {}",
                crate::built_info::CFG_OS,
                crate::built_info::RUSTC_VERSION
            ),
        );
        if let Some(information) = &self.information {
            set_prop("information", information.to_string());
        }
        let mut capabilities = FieldTable::new();
        let mut set_cap = |k: &str| {
            capabilities.insert(k.to_string(), AMQPValue::Boolean(true));
        };
        set_cap("consumer_cancel_notify");
        set_cap("connection.blocked");
        set_cap("publisher_confirms");
        set_cap("basic.nack");
        client_properties.insert(
            "capabilities".to_string(),
            AMQPValue::FieldTable(capabilities),
        );

        Ok((
            StartOk {
                client_properties,
                mechanism: auth.mechanism().to_string(),
                response: auth.response(),
                locale: self.locale.clone(),
            },
            start.server_properties,
        ))
    }

    pub(crate) fn make_tune_ok(&self, tune: Tune) -> Result<TuneOk> {
        // 0 on either side means "no limit"; the other side's proposal wins
        fn promote_0_u16(val: u16) -> u16 {
            if val == 0 {
                u16::max_value()
            } else {
                val
            }
        }
        fn promote_0_u32(val: u32) -> u32 {
            if val == 0 {
                u32::max_value()
            } else {
                val
            }
        }

        let channel_max = u16::min(
            promote_0_u16(tune.channel_max),
            promote_0_u16(self.channel_max),
        );
        let frame_max = u32::min(
            promote_0_u32(tune.frame_max),
            promote_0_u32(self.frame_max),
        );
        let heartbeat = u16::min(tune.heartbeat, self.heartbeat);

        if frame_max < u32::from(FRAME_MIN_SIZE) {
            return FrameMaxTooSmallSnafu {
                min: u32::from(FRAME_MIN_SIZE),
                requested: frame_max,
            }
            .fail();
        }

        Ok(TuneOk {
            channel_max,
            frame_max,
            heartbeat,
        })
    }

    pub(crate) fn make_open(&self) -> Open {
        Open {
            virtual_host: self.virtual_host.clone(),
            capabilities: "".to_string(), // reserved
            insist: false,                // reserved
        }
    }
}
