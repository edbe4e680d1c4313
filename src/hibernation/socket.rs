use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use bytes::Bytes;

use super::handle::{ExecutionEngine, ExecutionHandle, HandleParts};
use super::tags::TagMembership;
use super::writer::SocketSender;
use crate::core::{AttachmentError, SocketId, SocketMetadata};

/// What a socket keeps while its execution handle is gone.
#[derive(Clone, Debug, PartialEq)]
pub struct HibernationPackage {
    /// Serialized attachment; empty when the socket had none.
    pub attachment: Bytes,
    pub metadata: SocketMetadata,
}

#[derive(Debug)]
pub(crate) enum SocketState<H> {
    Active(H),
    Hibernating(HibernationPackage),
}

/// Registry entry for one accepted connection.
///
/// The writer (behind `sender`) and the read loop are owned outside `state`, so hibernating
/// never touches the connection itself.
#[derive(Debug)]
pub(crate) struct HibernatableSocket<H> {
    sender: SocketSender,
    state: SocketState<H>,
    memberships: Box<[TagMembership]>,
    tags: Box<[Arc<str>]>,
    close_dispatched: Arc<AtomicBool>,
}

impl<H: ExecutionHandle> HibernatableSocket<H> {
    pub(crate) fn new(
        sender: SocketSender,
        handle: H,
        memberships: Box<[TagMembership]>,
        tags: Box<[Arc<str>]>,
        close_dispatched: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sender,
            state: SocketState::Active(handle),
            memberships,
            tags,
            close_dispatched,
        }
    }

    pub(crate) fn sender(&self) -> &SocketSender {
        &self.sender
    }

    pub(crate) fn memberships(&self) -> &[TagMembership] {
        &self.memberships
    }

    pub(crate) fn tags(&self) -> &[Arc<str>] {
        &self.tags
    }

    pub(crate) fn close_dispatched(&self) -> &Arc<AtomicBool> {
        &self.close_dispatched
    }

    pub(crate) fn is_hibernating(&self) -> bool {
        matches!(self.state, SocketState::Hibernating(_))
    }

    /// Active -> Hibernating. Returns `false` when already hibernating.
    ///
    /// On a serialization failure the socket stays active with its handle intact.
    pub(crate) fn hibernate<E>(&mut self, engine: &E) -> Result<bool, AttachmentError>
    where
        E: ExecutionEngine<Handle = H>,
    {
        let SocketState::Active(handle) = &self.state else {
            return Ok(false);
        };
        let attachment = match handle.attachment() {
            Some(value) => engine.serialize_attachment(&value)?,
            None => Bytes::new(),
        };
        let metadata = handle.snapshot_for_hibernation();
        self.state = SocketState::Hibernating(HibernationPackage {
            attachment,
            metadata,
        });
        Ok(true)
    }

    /// Live handle, rebuilding it from the package if the socket is hibernating.
    ///
    /// A package that fails to deserialize is left in place.
    pub(crate) fn get_active_or_unhibernate<E>(
        &mut self,
        socket: SocketId,
        engine: &E,
    ) -> Result<H, AttachmentError>
    where
        E: ExecutionEngine<Handle = H>,
    {
        let package = match &self.state {
            SocketState::Active(handle) => return Ok(handle.clone()),
            SocketState::Hibernating(package) => package,
        };
        let attachment = engine.deserialize_attachment(&package.attachment)?;
        let handle = engine.build_handle(HandleParts {
            socket,
            sender: self.sender.clone(),
            attachment,
            metadata: package.metadata.clone(),
        });
        self.state = SocketState::Active(handle.clone());
        Ok(handle)
    }

    #[cfg(test)]
    pub(crate) fn package(&self) -> Option<&HibernationPackage> {
        match &self.state {
            SocketState::Hibernating(package) => Some(package),
            SocketState::Active(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use sonic_rs::json;

    use super::*;
    use crate::core::{Arena, FORMAT_VERSION, HEADER_TAG};
    use crate::hibernation::{HandleParts, WebSocketHandle};
    use crate::testing::{MockTransport, RecordingEngine};
    use crate::transport::into_boxed_halves;

    fn fixture() -> (SocketId, HibernatableSocket<WebSocketHandle>, RecordingEngine) {
        let (engine, _events) = RecordingEngine::new();
        let (transport, _peer) = MockTransport::channel_pair();
        let (metadata, _reader, writer) = into_boxed_halves(transport.with_metadata(SocketMetadata {
            url: Some("ws://example.test/room".into()),
            protocol: Some("chat".into()),
            extensions: Some("permessage-deflate".into()),
        }));
        let id = SocketId(Arena::new().insert(()));
        let sender = SocketSender::spawn(id, writer);
        let handle = engine.build_handle(HandleParts {
            socket: id,
            sender: sender.clone(),
            attachment: None,
            metadata,
        });
        let socket = HibernatableSocket::new(
            sender,
            handle,
            Box::new([]),
            Box::new([]),
            Arc::new(AtomicBool::new(false)),
        );
        (id, socket, engine)
    }

    #[tokio::test]
    async fn hibernate_round_trips_attachment_and_metadata() {
        let (id, mut socket, engine) = fixture();
        let live = socket.get_active_or_unhibernate(id, &engine).unwrap();
        live.set_attachment(Some(json!({"user": "ada", "seat": 3})));

        assert!(socket.hibernate(&engine).unwrap());
        assert!(socket.is_hibernating());
        assert!(!socket.hibernate(&engine).unwrap());
        let package = socket.package().unwrap();
        assert_eq!(package.attachment[..2], [HEADER_TAG, FORMAT_VERSION]);

        let woken = socket.get_active_or_unhibernate(id, &engine).unwrap();
        assert!(!socket.is_hibernating());
        assert!(!woken.same_handle(&live));
        assert_eq!(woken.attachment(), Some(json!({"user": "ada", "seat": 3})));
        assert_eq!(woken.url(), Some("ws://example.test/room"));
        assert_eq!(woken.protocol(), Some("chat"));
        assert_eq!(woken.extensions(), Some("permessage-deflate"));

        let again = socket.get_active_or_unhibernate(id, &engine).unwrap();
        assert!(again.same_handle(&woken));
    }

    #[tokio::test]
    async fn no_attachment_hibernates_to_empty_bytes() {
        let (id, mut socket, engine) = fixture();
        socket.hibernate(&engine).unwrap();
        assert!(socket.package().unwrap().attachment.is_empty());
        let woken = socket.get_active_or_unhibernate(id, &engine).unwrap();
        assert_eq!(woken.attachment(), None);
    }

    #[tokio::test]
    async fn version_mismatch_keeps_package() {
        let (id, mut socket, engine) = fixture();
        let mut bad = Vec::new();
        bad.put_u8(HEADER_TAG);
        bad.put_u8(FORMAT_VERSION + 1);
        bad.put_slice(b"null");
        socket.state = SocketState::Hibernating(HibernationPackage {
            attachment: Bytes::from(bad),
            metadata: SocketMetadata::default(),
        });

        let err = socket.get_active_or_unhibernate(id, &engine).unwrap_err();
        assert!(matches!(err, AttachmentError::UnsupportedVersion { .. }));
        assert!(socket.is_hibernating());
    }
}
