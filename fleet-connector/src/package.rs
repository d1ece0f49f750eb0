use anyhow::{anyhow, ensure, Context};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;

pub const PKG_ID_BYTES: usize = 4;
pub const PKG_ROUTE_LENGTH_BYTES: usize = 1;
pub const PKG_HEAD_BYTES: usize = PKG_ID_BYTES + PKG_ROUTE_LENGTH_BYTES;

/// A client request package.
///
/// Layout: message id (4 bytes, big-endian), route length (1 byte), route, JSON body.
/// Message id 0 marks a notify that expects no response.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub id: u32,
    pub route: String,
    pub body: Value,
}

impl Package {
    pub fn new(id: u32, route: impl Into<String>, body: Value) -> Self {
        Self { id, route: route.into(), body }
    }

    pub fn is_notify(&self) -> bool {
        self.id == 0
    }

    pub fn decode(src: &[u8]) -> anyhow::Result<Self> {
        ensure!(src.len() >= PKG_HEAD_BYTES, "package header needs {} bytes, got {}", PKG_HEAD_BYTES, src.len());
        let mut buf = src;
        let id = buf.get_u32();
        let route_len = buf.get_u8() as usize;
        ensure!(buf.remaining() >= route_len, "package route needs {} bytes, got {}", route_len, buf.remaining());
        let route = std::str::from_utf8(&buf[..route_len])
            .context("package route is not utf-8")?
            .to_string();
        buf.advance(route_len);
        let body = serde_json::from_slice(buf).with_context(|| format!("invalid body of package {} {}", id, route))?;
        Ok(Self { id, route, body })
    }

    pub fn encode(&self) -> anyhow::Result<Bytes> {
        let route = self.route.as_bytes();
        let route_len = u8::try_from(route.len()).map_err(|_| anyhow!("route {} longer than 255 bytes", self.route))?;
        let body = serde_json::to_vec(&self.body)?;
        let mut buf = BytesMut::with_capacity(PKG_HEAD_BYTES + route.len() + body.len());
        buf.put_u32(self.id);
        buf.put_u8(route_len);
        buf.put_slice(route);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }
}

/// Server to client message. Requests are answered by id, everything else is a push by route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Response { id: u32, body: Value },
    Push { route: String, body: Value },
}

impl Outbound {
    pub fn compose(id: u32, route: &str, body: Value) -> Self {
        if id != 0 {
            Outbound::Response { id, body }
        } else {
            Outbound::Push { route: route.to_string(), body }
        }
    }

    pub fn encode(&self) -> anyhow::Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::package::{Outbound, Package, PKG_HEAD_BYTES};

    #[test]
    fn test_decode_request() -> anyhow::Result<()> {
        let mut raw = vec![0, 0, 1, 2, 18];
        raw.extend_from_slice(b"area.playerHandler");
        assert_eq!(raw.len(), PKG_HEAD_BYTES + 18);
        raw.extend_from_slice(br#"{"x":1}"#);
        let package = Package::decode(&raw)?;
        assert_eq!(package.id, 258);
        assert_eq!(package.route, "area.playerHandler");
        assert_eq!(package.body, json!({"x": 1}));
        assert!(!package.is_notify());
        Ok(())
    }

    #[test]
    fn test_encoded_package_decodes() -> anyhow::Result<()> {
        let package = Package::new(0, "chat.chatHandler.send", json!({"content": "hi"}));
        let bytes = package.encode()?;
        assert_eq!(&bytes[..5], &[0, 0, 0, 0, 21]);
        assert_eq!(Package::decode(&bytes)?, package);
        Ok(())
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(Package::decode(&[0, 0, 1]).is_err());
        assert!(Package::decode(&[0, 0, 0, 1, 9, b'a']).is_err());
        assert!(Package::decode(&[0, 0, 0, 1, 1, b'a', b'{']).is_err());
    }

    #[test]
    fn test_compose_outbound() -> anyhow::Result<()> {
        let response = Outbound::compose(7, "connector.entryHandler.entry", json!({"code": 200}));
        assert_eq!(response.encode()?.as_ref(), br#"{"id":7,"body":{"code":200}}"#);
        let push = Outbound::compose(0, "onKick", json!({"reason": "kick"}));
        assert_eq!(push.encode()?.as_ref(), br#"{"route":"onKick","body":{"reason":"kick"}}"#);
        Ok(())
    }
}
