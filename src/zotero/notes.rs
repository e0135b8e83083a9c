//! 笔记写入接口
//!
//! 宿主应用（笔记图谱）实现 [`NoteGraphWriter`]，把条目的子笔记写到某个父节点下。
//! 同步引擎本身不调用它。

use crate::zotero::types::Record;
use anyhow::Result;
use async_trait::async_trait;

/// 笔记图谱写入器
#[async_trait]
pub trait NoteGraphWriter: Send + Sync {
    /// 在 `parent_id` 下第 `order` 个位置写入一段文本，返回新节点的 ID
    async fn write_block(&self, parent_id: &str, text: &str, order: usize) -> Result<String>;
}

/// 按顺序写入一组笔记条目的 `note` 字段，跳过空笔记，返回新节点 ID
pub async fn write_notes(
    writer: &dyn NoteGraphWriter,
    parent_id: &str,
    notes: &[Record],
) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(notes.len());
    let texts = notes
        .iter()
        .filter_map(|n| n.field("note"))
        .filter(|text| !text.trim().is_empty());
    for (order, text) in texts.enumerate() {
        ids.push(writer.write_block(parent_id, text, order).await?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        blocks: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl NoteGraphWriter for RecordingWriter {
        async fn write_block(&self, parent_id: &str, text: &str, order: usize) -> Result<String> {
            let mut blocks = self.blocks.lock().unwrap();
            blocks.push((parent_id.to_string(), text.to_string(), order));
            Ok(format!("block-{}", blocks.len()))
        }
    }

    fn note(key: &str, text: &str) -> Record {
        serde_json::from_value(serde_json::json!({
            "key": key,
            "version": 1,
            "data": { "key": key, "itemType": "note", "note": text }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn notes_are_written_in_order_without_blanks() {
        let writer = RecordingWriter::default();
        let notes = vec![note("N1", "<p>first</p>"), note("N2", "  "), note("N3", "<p>second</p>")];

        let ids = write_notes(&writer, "parent", &notes).await.unwrap();
        assert_eq!(ids, vec!["block-1", "block-2"]);

        let blocks = writer.blocks.lock().unwrap();
        assert_eq!(blocks[1], ("parent".to_string(), "<p>second</p>".to_string(), 1));
    }
}
