//! URL rewriting for the campus tunnel gateway.
//!
//! Internal university systems are reachable from outside the campus network
//! only through a gateway that expects the real hostname encrypted inside its
//! own URL path:
//!
//! ```text
//! https://<gateway>/<scheme[-port]>/<32-hex-IV><hex-ciphertext><path>[?query][#fragment]
//! ```
//!
//! The host cipher is AES-128-CFB with a fixed key and a fixed IV, exactly as
//! the gateway implements it. This is NOT confidentiality-grade encryption:
//! the key is public and the IV never changes. It exists only so the gateway
//! can resolve the host, and must not be reused for anything that needs secrecy.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use tracing::debug;
use url::Url;

use crate::config::TunnelConfig;

type HostEncryptor = cfb_mode::Encryptor<Aes128>;
type HostDecryptor = cfb_mode::Decryptor<Aes128>;

// ============================================================================
// Constants
// ============================================================================

/// Gateway key. The IV is the same 16 bytes.
const TUNNEL_KEY: [u8; 16] = *b"wrdvpnisthebest!";
const TUNNEL_IV: [u8; 16] = TUNNEL_KEY;

const BLOCK_LEN: usize = 16;

/// Length of the hex-encoded IV prefix
const IV_HEX_LEN: usize = BLOCK_LEN * 2;

/// Plaintext hosts are padded with ASCII '0' up to a whole block
const PAD_BYTE: u8 = b'0';

/// Gateway URLs are always https
const GATEWAY_DEFAULT_PORT_SUFFIX: &str = ":443";

// ============================================================================
// Host cipher
// ============================================================================

/// Encrypt a hostname into the gateway's path form: hex(IV) followed by the
/// hex ciphertext of the plaintext bytes only (the padding's ciphertext is
/// computed but not emitted).
pub fn encrypt_host(host: &str) -> String {
    let plain_len = host.len();
    let mut buf = host.as_bytes().to_vec();
    buf.resize(plain_len.div_ceil(BLOCK_LEN) * BLOCK_LEN, PAD_BYTE);

    HostEncryptor::new(&TUNNEL_KEY.into(), &TUNNEL_IV.into()).encrypt(&mut buf);

    let mut out = hex::encode(TUNNEL_IV);
    out.push_str(&hex::encode(&buf)[..plain_len * 2]);
    out
}

/// Reverse of [`encrypt_host`]. Returns `None` for anything that is not
/// well-formed hex or does not decrypt to UTF-8.
pub fn decrypt_host(encoded: &str) -> Option<String> {
    if encoded.len() < IV_HEX_LEN || !encoded.is_ascii() {
        return None;
    }
    let (iv_hex, body_hex) = encoded.split_at(IV_HEX_LEN);
    let iv: [u8; BLOCK_LEN] = hex::decode(iv_hex).ok()?.try_into().ok()?;

    let plain_len = encoded.len() / 2 - BLOCK_LEN;

    // Re-pad to whole blocks so the stream lines up; the padded tail is discarded.
    let mut padded_hex = body_hex.to_string();
    let target = padded_hex.len().div_ceil(IV_HEX_LEN) * IV_HEX_LEN;
    padded_hex.extend(std::iter::repeat('0').take(target - padded_hex.len()));

    let mut buf = hex::decode(&padded_hex).ok()?;
    HostDecryptor::new(&TUNNEL_KEY.into(), &iv.into()).decrypt(&mut buf);
    buf.truncate(plain_len);

    String::from_utf8(buf).ok()
}

// ============================================================================
// URL rewriting
// ============================================================================

fn normalize_gateway_host(raw: &str) -> String {
    let host = raw.trim().to_ascii_lowercase();
    match host.strip_suffix(GATEWAY_DEFAULT_PORT_SUFFIX) {
        Some(bare) => bare.to_string(),
        None => host,
    }
}

/// Rewrites plain URLs into gateway URLs and back.
///
/// Immutable after construction; clone freely.
#[derive(Debug, Clone)]
pub struct TunnelCipher {
    enabled: bool,
    /// `host` or `host:port`, lowercased, without a redundant `:443`
    gateway_host: String,
}

/// `host[:port]` of a parsed URL, omitting the scheme's default port
fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

impl TunnelCipher {
    pub fn new(config: &TunnelConfig) -> Self {
        Self {
            enabled: config.enabled,
            gateway_host: normalize_gateway_host(&config.gateway_host),
        }
    }

    /// A cipher that passes every URL through untouched
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            gateway_host: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn gateway_host(&self) -> &str {
        &self.gateway_host
    }

    /// Rewrite `url` into its gateway form.
    ///
    /// Returns the input unchanged when tunnelling is disabled, when the URL
    /// already points at the gateway, or when it cannot be parsed.
    pub fn to_tunnel_url(&self, url: &str) -> String {
        if !self.enabled {
            return url.to_string();
        }
        match self.wrap(url) {
            Some(wrapped) => wrapped,
            None => {
                debug!(url = url, "Leaving unparsable URL untunnelled");
                url.to_string()
            }
        }
    }

    fn wrap(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        if authority(&parsed)? == self.gateway_host {
            return Some(url.to_string());
        }

        // `Url::port` is None for the scheme's default port as well as for no port
        let segment = match parsed.port() {
            Some(port) => format!("{}-{}", parsed.scheme(), port),
            None => parsed.scheme().to_string(),
        };

        let mut out = format!(
            "https://{}/{}/{}{}",
            self.gateway_host,
            segment,
            encrypt_host(host),
            parsed.path()
        );
        if let Some(query) = parsed.query() {
            out.push('?');
            out.push_str(query);
        }
        if let Some(fragment) = parsed.fragment() {
            out.push('#');
            out.push_str(fragment);
        }
        Some(out)
    }

    /// Recover the plain URL from a gateway URL. `None` if `url` is not a
    /// well-formed gateway URL for this cipher's gateway host.
    pub fn from_tunnel_url(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        if authority(&parsed)? != self.gateway_host {
            return None;
        }

        let mut segments = parsed.path_segments()?;
        let proto = segments.next()?;
        let encrypted = segments.next()?;
        let rest: Vec<&str> = segments.collect();

        let (scheme, port) = match proto.split_once('-') {
            Some((scheme, port)) => (scheme, Some(port.parse::<u16>().ok()?)),
            None => (proto, None),
        };
        if scheme.is_empty() {
            return None;
        }
        let host = decrypt_host(encrypted)?;

        let mut out = format!("{}://{}", scheme, host);
        if let Some(port) = port {
            out.push_str(&format!(":{}", port));
        }
        out.push('/');
        out.push_str(&rest.join("/"));
        if let Some(query) = parsed.query() {
            out.push('?');
            out.push_str(query);
        }
        if let Some(fragment) = parsed.fragment() {
            out.push('#');
            out.push_str(fragment);
        }
        Some(out)
    }
}
