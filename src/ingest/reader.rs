//! 流式解析导入文档 `{"targetFeatures": [...]}`。
//!
//! 解析在阻塞线程里进行（`SyncIoBridge` 把异步读取器桥接成 `std::io::Read`），
//! 每个要素单独解码后经有界通道送出，内存占用与文档大小无关。

use super::feature::{decode_feature, FeatureError};
use crate::model::FieldInput;
use crate::object_store::ObjectReader;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use std::fmt;
use std::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;

const FEATURES_KEY: &str = "targetFeatures";
const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug)]
pub enum FeatureItem {
    Decoded(FieldInput),
    Malformed { id: Option<String>, reason: String },
}

impl FeatureItem {
    fn from_decode(result: Result<FieldInput, (Option<String>, FeatureError)>) -> Self {
        match result {
            Ok(input) => Self::Decoded(input),
            Err((id, e)) => Self::Malformed {
                id,
                reason: e.to_string(),
            },
        }
    }
}

/// 文档级错误：结构不对或 JSON 本身损坏，整个任务失败
#[derive(thiserror::Error, Debug)]
pub enum DocumentError {
    #[error("malformed import document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("feature consumer went away")]
    Closed,
    #[error("reader task aborted: {0}")]
    Aborted(String),
}

/// 启动解析任务。返回的 `JoinHandle` 在文档读完后给出要素总数。
/// 必须在 tokio 运行时内调用。
pub fn spawn_reader(
    reader: ObjectReader,
    capacity: usize,
) -> (
    mpsc::Receiver<FeatureItem>,
    JoinHandle<Result<u64, DocumentError>>,
) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let bridge = SyncIoBridge::new(reader);
    let handle = tokio::task::spawn_blocking(move || {
        let buffered = BufReader::with_capacity(READ_BUFFER, bridge);
        read_document(buffered, tx)
    });
    (rx, handle)
}

fn read_document<R: std::io::Read>(
    reader: R,
    tx: mpsc::Sender<FeatureItem>,
) -> Result<u64, DocumentError> {
    let mut de = serde_json::Deserializer::from_reader(reader);
    let seed = DocumentSeed { tx: &tx };
    match seed.deserialize(&mut de) {
        Ok(count) => {
            de.end()?;
            Ok(count)
        }
        // 消费端已关闭（取消），不算文档错误
        Err(_) if tx.is_closed() => Err(DocumentError::Closed),
        Err(e) => Err(e.into()),
    }
}

struct DocumentSeed<'a> {
    tx: &'a mpsc::Sender<FeatureItem>,
}

impl<'de> DeserializeSeed<'de> for DocumentSeed<'_> {
    type Value = u64;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DocumentSeed<'_> {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "an object with a `{}` array", FEATURES_KEY)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<u64, A::Error> {
        let mut count = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == FEATURES_KEY && count.is_none() {
                count = Some(map.next_value_seed(FeaturesSeed { tx: self.tx })?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        count.ok_or_else(|| de::Error::missing_field(FEATURES_KEY))
    }
}

struct FeaturesSeed<'a> {
    tx: &'a mpsc::Sender<FeatureItem>,
}

impl<'de> DeserializeSeed<'de> for FeaturesSeed<'_> {
    type Value = u64;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for FeaturesSeed<'_> {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of features")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<u64, A::Error> {
        let mut count = 0u64;
        while let Some(value) = seq.next_element::<Value>()? {
            let item = FeatureItem::from_decode(decode_feature(value));
            self.tx
                .blocking_send(item)
                .map_err(|_| de::Error::custom("feature consumer went away"))?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(id: &str) -> Value {
        json!({
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[139.70, 35.60], [139.71, 35.60], [139.71, 35.61], [139.70, 35.60]]]
            },
            "properties": { "ID": id, "CityCode": "13101" }
        })
    }

    async fn collect(doc: Vec<u8>) -> (Vec<FeatureItem>, Result<u64, DocumentError>) {
        let reader: ObjectReader = Box::pin(std::io::Cursor::new(doc));
        let (mut rx, handle) = spawn_reader(reader, 2);
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        (items, handle.await.unwrap())
    }

    #[tokio::test]
    async fn streams_features_and_skips_other_keys() {
        let doc = json!({
            "meta": {"nested": [1, 2, {"x": null}]},
            "targetFeatures": [
                feature("11111111-1111-4111-8111-111111111111"),
                {"properties": {"ID": "broken"}},
                feature("22222222-2222-4222-8222-222222222222"),
            ],
            "trailer": "ok"
        });
        let (items, result) = collect(serde_json::to_vec(&doc).unwrap()).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], FeatureItem::Decoded(_)));
        match &items[1] {
            FeatureItem::Malformed { id, .. } => assert_eq!(id.as_deref(), Some("broken")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(items[2], FeatureItem::Decoded(_)));
    }

    #[tokio::test]
    async fn empty_array_is_fine() {
        let (items, result) = collect(br#"{"targetFeatures": []}"#.to_vec()).await;
        assert!(items.is_empty());
        assert_eq!(result.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_key_is_a_document_error() {
        let (_, result) = collect(br#"{"features": []}"#.to_vec()).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("targetFeatures"), "{}", err);
    }

    #[tokio::test]
    async fn wrong_shapes_are_document_errors() {
        let (_, result) = collect(br#"{"targetFeatures": {"a": 1}}"#.to_vec()).await;
        assert!(matches!(result, Err(DocumentError::Malformed(_))));
        let (_, result) = collect(br#"[1, 2]"#.to_vec()).await;
        assert!(matches!(result, Err(DocumentError::Malformed(_))));
    }

    #[tokio::test]
    async fn truncated_document_fails_after_emitting_prefix() {
        let mut doc = br#"{"targetFeatures": ["#.to_vec();
        doc.extend(serde_json::to_vec(&feature("11111111-1111-4111-8111-111111111111")).unwrap());
        doc.extend(br#", {"geometry": "#);
        let (items, result) = collect(doc).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(result, Err(DocumentError::Malformed(_))));
    }
}
