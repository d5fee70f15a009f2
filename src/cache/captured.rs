use std::io;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::http::{Headers, ResponseWriter, StatusCode};

/// A response as persisted by the cache: status, header snapshot and body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub header: Headers,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
}

impl CapturedResponse {
    /// Replays the capture into `writer`.
    ///
    /// Stored headers win: every stored header name is cleared from the
    /// writer's map before the stored values are appended. Headers the writer
    /// already carries under other names are left alone.
    pub async fn replay_onto<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: ResponseWriter + ?Sized,
    {
        writer.headers_mut().override_with(&self.header);
        writer.write_header(self.status);
        writer.write(&self.data).await?;
        Ok(())
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}
