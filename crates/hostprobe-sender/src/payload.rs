//! Wire format of a delivery request body.
//!
//! A plain body carries the metrics directly. An encrypted body is an
//! envelope whose `data` field holds the sealed plain body. In both cases the
//! `compressed` flag is written into the JSON before gzip runs, so the flag
//! travels inside the compressed bytes.

use crate::cipher::PayloadCipher;
use crate::codec::{gzip, COMPRESSION_THRESHOLD};
use crate::error::Result;
use hostprobe_common::types::Sample;
use serde::Serialize;

/// Who is reporting. Sent with every batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    pub machine_name: String,
    /// Unix seconds.
    pub boot_time: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct Payload<'a> {
    pub machine_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_time: Option<u64>,
    pub metrics: &'a [Sample],
    pub encrypted: bool,
    pub compressed: bool,
}

#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub machine_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_time: Option<u64>,
    pub encrypted: bool,
    pub compressed: bool,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Body<'a> {
    Plain(Payload<'a>),
    Sealed(Envelope<'a>),
}

impl Body<'_> {
    fn set_compressed(&mut self, compressed: bool) {
        match self {
            Body::Plain(p) => p.compressed = compressed,
            Body::Sealed(e) => e.compressed = compressed,
        }
    }
}

/// Request body ready to be posted.
#[derive(Debug)]
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    pub encrypted: bool,
    /// When set the request carries `Content-Encoding: gzip`.
    pub compressed: bool,
}

/// Serializes `batch`, sealing it when `cipher` is given and compressing
/// bodies above [`COMPRESSION_THRESHOLD`].
///
/// A compression failure is not an error: the uncompressed body (with
/// `compressed=false`) is returned instead.
pub fn encode(
    identity: &MachineIdentity,
    batch: &[Sample],
    cipher: Option<&PayloadCipher>,
) -> Result<EncodedBody> {
    encode_with(identity, batch, cipher, gzip)
}

fn encode_with(
    identity: &MachineIdentity,
    batch: &[Sample],
    cipher: Option<&PayloadCipher>,
    compress: impl FnOnce(&[u8]) -> std::io::Result<Vec<u8>>,
) -> Result<EncodedBody> {
    let plain = Payload {
        machine_name: &identity.machine_name,
        boot_time: identity.boot_time,
        metrics: batch,
        encrypted: false,
        compressed: false,
    };

    let mut body = match cipher {
        Some(cipher) => {
            let inner = serde_json::to_vec(&plain)?;
            Body::Sealed(Envelope {
                machine_name: &identity.machine_name,
                boot_time: identity.boot_time,
                encrypted: true,
                compressed: false,
                data: cipher.seal(&inner)?,
            })
        }
        None => Body::Plain(plain),
    };
    let encrypted = cipher.is_some();

    let serialized = serde_json::to_vec(&body)?;
    if serialized.len() <= COMPRESSION_THRESHOLD {
        return Ok(EncodedBody {
            bytes: serialized,
            encrypted,
            compressed: false,
        });
    }

    body.set_compressed(true);
    let flagged = serde_json::to_vec(&body)?;
    match compress(&flagged) {
        Ok(bytes) => Ok(EncodedBody {
            bytes,
            encrypted,
            compressed: true,
        }),
        Err(e) => {
            tracing::warn!(error = %e, size = serialized.len(), "Compression failed, sending uncompressed body");
            Ok(EncodedBody {
                bytes: serialized,
                encrypted,
                compressed: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::gunzip;
    use hostprobe_common::types::MetricName;
    use serde_json::Value;

    fn identity() -> MachineIdentity {
        MachineIdentity {
            machine_name: "web-01".to_string(),
            boot_time: Some(1_700_000_000),
        }
    }

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::system(MetricName::Cpu, i as f64).with_metadata("core", i.to_string()))
            .collect()
    }

    #[test]
    fn small_plain_body_is_left_alone() {
        let body = encode(&identity(), &samples(1), None).unwrap();
        assert!(!body.encrypted);
        assert!(!body.compressed);

        let json: Value = serde_json::from_slice(&body.bytes).unwrap();
        assert_eq!(json["machine_name"], "web-01");
        assert_eq!(json["boot_time"], 1_700_000_000u64);
        assert_eq!(json["encrypted"], false);
        assert_eq!(json["compressed"], false);
        assert_eq!(json["metrics"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn large_body_carries_compressed_flag_inside_gzip() {
        let batch = samples(100);
        let body = encode(&identity(), &batch, None).unwrap();
        assert!(body.compressed);

        let raw = gunzip(&body.bytes).unwrap();
        let json: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["compressed"], true);
        assert_eq!(json["metrics"].as_array().unwrap().len(), 100);

        // Byte-identical to serializing the flagged body directly.
        let expected = serde_json::to_vec(&Payload {
            machine_name: "web-01",
            boot_time: Some(1_700_000_000),
            metrics: &batch,
            encrypted: false,
            compressed: true,
        })
        .unwrap();
        assert_eq!(raw, expected);
    }

    #[test]
    fn sealed_envelope_hides_metrics() {
        let cipher = PayloadCipher::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let body = encode(&identity(), &samples(1), Some(&cipher)).unwrap();
        assert!(body.encrypted);

        let json: Value = serde_json::from_slice(&body.bytes).unwrap();
        assert_eq!(json["encrypted"], true);
        assert!(json.get("metrics").is_none());

        let inner = cipher.open(json["data"].as_str().unwrap()).unwrap();
        let inner: Value = serde_json::from_slice(&inner).unwrap();
        assert_eq!(inner["encrypted"], false);
        assert_eq!(inner["metrics"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn failed_compression_falls_back_to_uncompressed_body() {
        let failing = |_: &[u8]| -> std::io::Result<Vec<u8>> { Err(std::io::Error::other("deflate failed")) };
        let body = encode_with(&identity(), &samples(100), None, failing).unwrap();
        assert!(!body.compressed);

        let json: Value = serde_json::from_slice(&body.bytes).unwrap();
        assert_eq!(json["compressed"], false);
        assert_eq!(json["metrics"].as_array().unwrap().len(), 100);
    }

    #[test]
    fn missing_boot_time_is_omitted() {
        let id = MachineIdentity {
            machine_name: "db-02".to_string(),
            boot_time: None,
        };
        let body = encode(&id, &samples(1), None).unwrap();
        let json: Value = serde_json::from_slice(&body.bytes).unwrap();
        assert!(json.get("boot_time").is_none());
    }
}
