//! Newline-delimited JSON frames exchanged with peers

use crate::Result;
use agent_api::{ConnectionProperties, Message};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Role of the party issuing an attach
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    Sender,
    Receiver,
}

impl LinkRole {
    /// Role the other end takes when it accepts the link
    pub fn opposite(self) -> Self {
        match self {
            LinkRole::Sender => LinkRole::Receiver,
            LinkRole::Receiver => LinkRole::Sender,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Open {
        container_id: String,
        #[serde(default)]
        properties: ConnectionProperties,
    },
    /// A receiver attach without a source asks for a dynamically assigned one
    Attach {
        link: String,
        role: LinkRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Detach {
        link: String,
    },
    Transfer {
        link: String,
        message: Message,
    },
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Open { .. } => "open",
            Frame::Attach { .. } => "attach",
            Frame::Detach { .. } => "detach",
            Frame::Transfer { .. } => "transfer",
            Frame::Close { .. } => "close",
        }
    }
}

/// Reads one frame per line
pub struct FrameReader<R> {
    inner: R,
    line: String,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
        }
    }

    /// Next frame, or None at end of stream. Blank lines are skipped.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(line)?));
        }
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut bytes = serde_json::to_vec(frame)?;
        bytes.push(b'\n');
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LinkError;
    use serde_json::json;
    use tokio::io::BufReader;

    #[test]
    fn test_attach_wire_shape() {
        let frame = Frame::Attach {
            link: "l1".to_string(),
            role: LinkRole::Receiver,
            source: Some("routers".to_string()),
            target: None,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"frame": "attach", "link": "l1", "role": "receiver", "source": "routers"})
        );
    }

    #[test]
    fn test_open_without_properties_is_a_client() {
        let frame: Frame = serde_json::from_str(r#"{"frame":"open","container_id":"console"}"#).unwrap();
        match frame {
            Frame::Open { container_id, properties } => {
                assert_eq!(container_id, "console");
                assert_eq!(properties.product, None);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reader_skips_blank_lines_and_stops_at_eof() {
        let input = b"{\"frame\":\"detach\",\"link\":\"a\"}\n\n{\"frame\":\"close\"}\n";
        let mut reader = FrameReader::new(BufReader::new(&input[..]));

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::Detach { link: "a".to_string() })
        );
        assert_eq!(reader.next_frame().await.unwrap(), Some(Frame::Close { error: None }));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_rejects_garbage() {
        let mut reader = FrameReader::new(BufReader::new(&b"hello\n"[..]));
        assert!(matches!(reader.next_frame().await, Err(LinkError::Codec(_))));
    }

    #[tokio::test]
    async fn test_writer_terminates_frames_with_newline() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        writer.write_frame(&Frame::Close { error: None }).await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = FrameReader::new(BufReader::new(server));
        assert_eq!(reader.next_frame().await.unwrap(), Some(Frame::Close { error: None }));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }
}
