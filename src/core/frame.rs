use bytes::Bytes;

/// Close code reported when a close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code synthesized when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Transport-neutral websocket frame type.
///
/// Transports convert their native frame representation into/from `WsFrame`; nothing above
/// the transport layer sees tungstenite types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsCloseFrame {
    pub fn reason_lossy(&self) -> String {
        String::from_utf8_lossy(self.reason.as_ref()).into_owned()
    }
}

impl WsFrame {
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn binary(b: impl Into<Bytes>) -> Self {
        Self::Binary(b.into())
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: Bytes::from(reason.into()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_helper_builds_frame() {
        let frame = WsFrame::close(1000, "bye");
        let WsFrame::Close(Some(close)) = frame else {
            panic!("expected close frame");
        };
        assert_eq!(close.code, 1000);
        assert_eq!(close.reason_lossy(), "bye");
    }

    #[test]
    fn text_helper_keeps_utf8_bytes() {
        assert_eq!(WsFrame::text("héllo"), WsFrame::Text(Bytes::from("héllo")));
    }
}
