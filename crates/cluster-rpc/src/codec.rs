use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};

use crate::frame::{Frame, FrameError};

/// 128 MiB, generous enough for a concatenated-headers root block payload.
const MAX_FRAME_LENGTH: usize = 1 << 27;

fn length_delimited_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Encodes/decodes whole [`Frame`]s over a length-delimited byte stream.
///
/// Wraps `tokio_util`'s `LengthDelimitedCodec` (the same 4-byte big-endian
/// length-prefix framing `dekaf` uses for its client connections) and adds a
/// `bincode` layer on top, matching the length-prefix-then-payload shape of
/// `connector-init`'s subprocess codec.
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec {
            inner: length_delimited_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some(bytes) = self
            .inner
            .decode(src)
            .map_err(|err| FrameError::Decode(bincode::ErrorKind::Io(err).into()))?
        else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&bytes).map_err(FrameError::Decode)?))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let bytes = bincode::serialize(&item).map_err(FrameError::Encode)?;
        self.inner
            .encode(Bytes::from(bytes), dst)
            .map_err(|err| FrameError::Encode(bincode::ErrorKind::Io(err).into()))
    }
}

/// Wraps a byte stream (normally a split half of a `TcpStream`) in a framed
/// transport that speaks whole [`Frame`]s.
pub fn framed_transport<S>(stream: S) -> Framed<S, FrameCodec>
where
    S: AsyncRead + AsyncWrite,
{
    Framed::new(stream, FrameCodec::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::ROOT_BRANCH;
    use crate::frame::ClusterMetadata;
    use crate::messages::PingRequest;
    use crate::ops::ClusterOp;
    use futures::{SinkExt, StreamExt};

    #[tokio::test]
    async fn round_trips_a_frame_over_a_duplex_stream() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client = framed_transport(client);
        let mut server = framed_transport(server);

        let frame = Frame::new_rpc(
            ClusterOp::Ping,
            7,
            ClusterMetadata::local(ROOT_BRANCH),
            &PingRequest,
        )
        .unwrap();

        client.send(frame).await.unwrap();
        let received = server.next().await.unwrap().unwrap();

        assert_eq!(received.op, ClusterOp::Ping);
        assert_eq!(received.rpc_id, Some(7));
        assert_eq!(received.metadata.branch, ROOT_BRANCH);
    }
}
