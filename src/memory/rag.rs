//! 政策文档检索（语义索引）
//!
//! 从目录加载 markdown 政策文档，分块、向量化后存于内存；按余弦相似度返回 top-K 段落，
//! 相关度高者在前。索引构建后只读，可在并发的工具调用间共享。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::EmbeddingProvider;

/// 检索返回的一个段落
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub title: String,
    pub source: String,
    pub text: String,
    /// 相关度（余弦相似度）
    pub score: f32,
}

/// 语义索引边界：自由文本 + K → 按相关度降序的段落
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, String>;
}

/// 一篇政策文档
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    pub title: String,
    pub source: String,
    pub content: String,
}

/// 文档块
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub title: String,
    pub source: String,
}

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            separators: vec!["\n\n".to_string(), ". ".to_string()],
        }
    }
}

/// 文档分块器
#[derive(Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// 将文本切成重叠的块（UTF-8 安全）；只在块的后半段寻找段落 / 句子边界
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let size = self.config.chunk_size.max(1);

        if total <= size {
            let trimmed = text.trim();
            return if trimmed.is_empty() {
                vec![]
            } else {
                vec![trimmed.to_string()]
            };
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < total {
            let mut end = (start + size).min(total);

            if end < total {
                let window: String = chars[start..end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = window.rfind(sep.as_str()) {
                        let cut = window[..pos].chars().count() + sep.trim_end().chars().count();
                        if cut > size / 2 {
                            end = start + cut;
                            break;
                        }
                    }
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= total {
                break;
            }
            let next = end.saturating_sub(self.config.chunk_overlap);
            start = if next > start { next } else { end };
        }
        chunks
    }
}

/// 文件名转标题：`return_policy` → `Return Policy`
fn title_from_stem(stem: &str) -> String {
    stem.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut cs = w.chars();
            match cs.next() {
                Some(first) => first.to_uppercase().chain(cs.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// 加载目录下所有 `*.md`；标题取首个 `# ` 标题，否则取文件名。目录不存在时返回空
pub fn load_policies(dir: &Path) -> Result<Vec<PolicyDocument>, String> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "policies directory not found");
        return Ok(vec![]);
    }
    let pattern = dir.join("*.md");
    let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| e.to_string())?;

    let mut docs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| e.to_string())?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("read {}: {}", path.display(), e))?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = content
            .lines()
            .find_map(|l| l.strip_prefix("# "))
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| title_from_stem(&stem));
        docs.push(PolicyDocument {
            title,
            source: path.display().to_string(),
            content,
        });
    }
    Ok(docs)
}

/// 余弦相似度
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 内存向量索引：(chunk, embedding)
pub struct PolicyIndex {
    entries: Vec<(Chunk, Vec<f32>)>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl PolicyIndex {
    /// 分块并批量嵌入
    pub async fn build(
        embedder: Arc<dyn EmbeddingProvider>,
        docs: Vec<PolicyDocument>,
        chunker: &Chunker,
    ) -> Result<Self, String> {
        let chunks: Vec<Chunk> = docs
            .iter()
            .flat_map(|doc| {
                chunker
                    .chunk(&doc.content)
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| Chunk {
                        id: format!("{}_{}", doc.source, i),
                        text,
                        title: doc.title.clone(),
                        source: doc.source.clone(),
                    })
            })
            .collect();

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            ));
        }
        Ok(Self {
            entries: chunks.into_iter().zip(embeddings).collect(),
            embedder,
        })
    }

    /// 加载目录并建索引
    pub async fn load_dir(embedder: Arc<dyn EmbeddingProvider>, dir: &Path) -> Result<Self, String> {
        let docs = load_policies(dir)?;
        let index = Self::build(embedder, docs, &Chunker::default()).await?;
        tracing::info!(dir = %dir.display(), chunks = index.len(), "policy index ready");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SemanticIndex for PolicyIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, String> {
        if self.entries.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        if query_embedding.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<(f32, &Chunk)> = self
            .entries
            .iter()
            .map(|(chunk, emb)| (cosine_similarity(&query_embedding, emb), chunk))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| Passage {
                title: chunk.title.clone(),
                source: chunk.source.clone(),
                text: chunk.text.clone(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = Chunker::default().chunk("  Returns accepted within 30 days.  ");
        assert_eq!(chunks, vec!["Returns accepted within 30 days.".to_string()]);
    }

    #[test]
    fn test_chunks_overlap_and_break_on_sentences() {
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 20,
            ..Default::default()
        });
        let text = "Items must be unused. ".repeat(20);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 100);
            assert!(c.ends_with('.'));
        }
    }

    #[test]
    fn test_title_from_stem() {
        assert_eq!(title_from_stem("return_policy"), "Return Policy");
        assert_eq!(title_from_stem("SHIPPING-info"), "Shipping Info");
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_load_and_search_policies() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("returns.md"),
            "# Return Policy\n\nYou may return any unused item within 30 days for a full refund.",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("shipping_times.md"),
            "Standard shipping takes 5 to 7 business days. Express shipping takes 2 days.",
        )
        .unwrap();

        let docs = load_policies(dir.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().any(|d| d.title == "Shipping Times"));

        let index = PolicyIndex::load_dir(Arc::new(HashingEmbedder::default()), dir.path())
            .await
            .unwrap();
        let hits = index.search("how do I return an item for a refund", 3).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].title, "Return Policy");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty_index() {
        let index = PolicyIndex::load_dir(
            Arc::new(HashingEmbedder::default()),
            Path::new("/nonexistent/policies"),
        )
        .await
        .unwrap();
        assert!(index.is_empty());
        assert!(index.search("anything", 3).await.unwrap().is_empty());
    }
}
