use super::Connection;
use crate::errors::*;
use crate::{Auth, ConnectionOptions};
use percent_encoding::percent_decode_str;
use snafu::ResultExt;
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

pub(super) fn open(url: &str) -> Result<Connection> {
    let mut url = parse_url(url)?;
    let scheme = populate_host_and_port(&mut url)?;
    let options = decode(&url)?;

    match scheme {
        Scheme::Amqp => Connection::open(options),
        Scheme::Amqps => open_amqps(&url, options),
    }
}

// `url` rejects an authority that carries credentials or a port but no host
// ("amqp://user@/", "amqp://:5673"), so localhost is spliced in before parsing.
fn parse_url(url: &str) -> Result<Url> {
    let url = match url.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            let rest = &url[authority_start..];
            let authority_len = rest
                .find(|c: char| c == '/' || c == '?' || c == '#')
                .unwrap_or_else(|| rest.len());
            let authority = &rest[..authority_len];
            let host_start = authority.rfind('@').map_or(0, |at| at + 1);
            let host = &authority[host_start..];
            if !authority.is_empty() && (host.is_empty() || host.starts_with(':')) {
                let at = authority_start + host_start;
                Cow::Owned(format!("{}localhost{}", &url[..at], &url[at..]))
            } else {
                Cow::Borrowed(url)
            }
        }
        None => Cow::Borrowed(url),
    };
    Url::parse(&url).context(UrlParseSnafu)
}

#[cfg(not(feature = "native-tls"))]
fn open_amqps(url: &Url, _: ConnectionOptions) -> Result<Connection> {
    InvalidUrlSnafu {
        url: format!("{} (amqps requires the native-tls feature)", url),
    }
    .fail()
}

#[cfg(feature = "native-tls")]
fn open_amqps(_: &Url, options: ConnectionOptions) -> Result<Connection> {
    let connector = native_tls::TlsConnector::new().map_err(|err| Error::TlsHandshake {
        message: err.to_string(),
    })?;
    let domain = options.host.clone();
    Connection::open_tls(connector, &domain, options)
}

#[derive(Debug, PartialEq)]
enum Scheme {
    Amqp,
    Amqps,
}

fn invalid_url(url: &Url) -> Error {
    Error::InvalidUrl {
        url: url.to_string(),
    }
}

fn populate_host_and_port(url: &mut Url) -> Result<Scheme> {
    if !url.has_host() || url.host_str() == Some("") {
        url.set_host(Some("localhost")).context(UrlParseSnafu)?;
    }
    let (scheme, default_port) = match url.scheme() {
        "amqp" => (Scheme::Amqp, 5672),
        "amqps" => (Scheme::Amqps, 5671),
        _ => return Err(invalid_url(url)),
    };
    let port = url.port().unwrap_or(default_port);
    url.set_port(Some(port)).map_err(|()| invalid_url(url))?;
    Ok(scheme)
}

fn percent_decode(s: &str) -> Cow<str> {
    percent_decode_str(s).decode_utf8_lossy()
}

fn decode(url: &Url) -> Result<ConnectionOptions> {
    let mut options = ConnectionOptions::default();
    if let Some(host) = url.host_str() {
        options = options.host(host);
    }
    if let Some(port) = url.port() {
        options = options.port(port);
    }

    if let Some(mut path_segments) = url.path_segments() {
        // "amqp://host" and "amqp://host/" both select the default vhost
        if let Some(vhost) = path_segments.next() {
            if !vhost.is_empty() {
                options = options.virtual_host(percent_decode(vhost));
            }
        }
        if path_segments.next().is_some() {
            return Err(invalid_url(url));
        }
    }

    if !url.username().is_empty() || url.password().is_some() {
        let username = match url.username() {
            "" => "guest",
            other => other,
        };
        options = options.auth(Auth::Plain {
            username: percent_decode(username).to_string(),
            password: percent_decode(url.password().unwrap_or("guest")).to_string(),
        });
    }

    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "heartbeat" => {
                let v = v.parse::<u16>().map_err(|_| invalid_url(url))?;
                options = options.heartbeat(v);
            }
            "channel_max" => {
                let v = v.parse::<u16>().map_err(|_| invalid_url(url))?;
                options = options.channel_max(v);
            }
            "frame_max" => {
                let v = v.parse::<u32>().map_err(|_| invalid_url(url))?;
                options = options.frame_max(v);
            }
            "connection_timeout" => {
                let v = v.parse::<u64>().map_err(|_| invalid_url(url))?;
                options = options.socket_timeout(Duration::from_millis(v));
            }
            "auth_mechanism" if v.eq_ignore_ascii_case("external") => {
                options = options.auth(Auth::External);
            }
            _ => return Err(invalid_url(url)),
        }
    }

    Ok(options)
}
