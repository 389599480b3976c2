//! Engine configuration

use std::str::FromStr;
use std::time::Duration;

/// Default upstream endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.labelary.com";

/// Which document assembly strategy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblyMode {
    /// PDF-merge up to the threshold, PNG-embed above it
    #[default]
    Auto,
    /// Always PDF-merge
    PdfMerge,
    /// Always PNG-embed
    PngEmbed,
}

impl FromStr for AssemblyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "pdf" | "pdf-merge" | "merge" => Ok(Self::PdfMerge),
            "png" | "png-embed" | "embed" => Ok(Self::PngEmbed),
            other => Err(format!("Unknown assembly mode: {other}")),
        }
    }
}

/// 渲染引擎配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 最小值 | 说明 |
/// |----------|--------|--------|------|
/// | RENDER_BASE_URLS | https://api.labelary.com | 1 项 | 上游地址列表 (逗号分隔, 按序轮换) |
/// | RENDER_MAX_CONCURRENCY | 4 | 1 | 全局并发上游请求数 |
/// | RENDER_MAX_ATTEMPTS | 6 | 1 | 单次调用最大尝试次数 |
/// | RENDER_TIMEOUT_MS | 25000 | 1000 | 单次请求超时(毫秒) |
/// | RENDER_CACHE_CAPACITY | 256 | 16 | LRU 缓存条目数 |
/// | RENDER_BATCH_SIZE | 2 | 1 | 每批并发标签数 |
/// | RENDER_BATCH_DELAY_MS | 150 | 0 | 批次间隔(毫秒) |
/// | RENDER_POOL_CAP | 4 | 1 | 逻辑实例池上限 |
/// | RENDER_ASSEMBLY | auto | - | auto / pdf / png |
/// | RENDER_PNG_THRESHOLD | 35 | 1 | 超过该标签数改用 PNG 嵌入 |
/// | RENDER_MERGE_BATCH_SIZE | 15 (>30 标签时 20) | 1 | 每批合并的 PDF 数 |
/// | RENDER_BACKOFF_JITTER_MS | 250 | 0 | 退避抖动上限 |
/// | RENDER_RATE_LIMIT_PENALTY_MS | 1000 | 0 | 429 重试前按实例编号追加的等待 |
/// | RENDER_FALLBACK_BATCH_DELAY_MS | 600 | 0 | PNG 回退时的批次间隔 |
///
/// # 示例
///
/// ```ignore
/// RENDER_BASE_URLS=http://127.0.0.1:9002,https://api.labelary.com zpl-render health
/// ```
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// 上游地址列表，按 `(instance - 1 + attempt) mod len` 轮换
    pub base_urls: Vec<String>,
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub request_timeout_ms: u64,
    pub cache_capacity: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub pool_cap: usize,
    pub assembly: AssemblyMode,
    pub png_threshold: usize,
    /// `None` picks 15, or 20 for documents above 30 labels
    pub merge_batch_size: Option<usize>,
    pub backoff_jitter_ms: u64,
    pub rate_limit_penalty_ms: u64,
    pub fallback_batch_delay_ms: u64,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl RenderConfig {
    pub fn new(base_urls: Vec<String>) -> Self {
        Self {
            base_urls,
            max_concurrency: 4,
            max_attempts: 6,
            request_timeout_ms: 25_000,
            cache_capacity: 256,
            batch_size: 2,
            batch_delay_ms: 150,
            pool_cap: 4,
            assembly: AssemblyMode::Auto,
            png_threshold: 35,
            merge_batch_size: None,
            backoff_jitter_ms: 250,
            rate_limit_penalty_ms: 1000,
            fallback_batch_delay_ms: 600,
        }
        .normalized()
    }

    /// 从环境变量加载配置
    ///
    /// 未设置或无法解析的变量使用默认值
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_urls: std::env::var("RENDER_BASE_URLS")
                .map(|v| parse_base_urls(&v))
                .unwrap_or(defaults.base_urls),
            max_concurrency: env_parse("RENDER_MAX_CONCURRENCY")
                .unwrap_or(defaults.max_concurrency),
            max_attempts: env_parse("RENDER_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            request_timeout_ms: env_parse("RENDER_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout_ms),
            cache_capacity: env_parse("RENDER_CACHE_CAPACITY").unwrap_or(defaults.cache_capacity),
            batch_size: env_parse("RENDER_BATCH_SIZE").unwrap_or(defaults.batch_size),
            batch_delay_ms: env_parse("RENDER_BATCH_DELAY_MS").unwrap_or(defaults.batch_delay_ms),
            pool_cap: env_parse("RENDER_POOL_CAP").unwrap_or(defaults.pool_cap),
            assembly: env_parse("RENDER_ASSEMBLY").unwrap_or(defaults.assembly),
            png_threshold: env_parse("RENDER_PNG_THRESHOLD").unwrap_or(defaults.png_threshold),
            merge_batch_size: env_parse("RENDER_MERGE_BATCH_SIZE"),
            backoff_jitter_ms: env_parse("RENDER_BACKOFF_JITTER_MS")
                .unwrap_or(defaults.backoff_jitter_ms),
            rate_limit_penalty_ms: env_parse("RENDER_RATE_LIMIT_PENALTY_MS")
                .unwrap_or(defaults.rate_limit_penalty_ms),
            fallback_batch_delay_ms: env_parse("RENDER_FALLBACK_BATCH_DELAY_MS")
                .unwrap_or(defaults.fallback_batch_delay_ms),
        }
        .normalized()
    }

    /// Clamp every knob to its minimum
    pub fn normalized(mut self) -> Self {
        self.base_urls = self
            .base_urls
            .iter()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if self.base_urls.is_empty() {
            self.base_urls.push(DEFAULT_BASE_URL.to_string());
        }
        self.max_concurrency = self.max_concurrency.max(1);
        self.max_attempts = self.max_attempts.max(1);
        self.request_timeout_ms = self.request_timeout_ms.max(1000);
        self.cache_capacity = self.cache_capacity.max(16);
        self.batch_size = self.batch_size.max(1);
        self.pool_cap = self.pool_cap.max(1);
        self.png_threshold = self.png_threshold.max(1);
        self.merge_batch_size = self.merge_batch_size.map(|n| n.max(1));
        self
    }

    pub fn with_base_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_urls = urls.into_iter().map(Into::into).collect();
        self.normalized()
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self.normalized()
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self.normalized()
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self.normalized()
    }

    pub fn with_cache_capacity(mut self, n: usize) -> Self {
        self.cache_capacity = n;
        self.normalized()
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self.normalized()
    }

    pub fn with_batch_delay_ms(mut self, ms: u64) -> Self {
        self.batch_delay_ms = ms;
        self
    }

    pub fn with_pool_cap(mut self, n: usize) -> Self {
        self.pool_cap = n;
        self.normalized()
    }

    pub fn with_assembly(mut self, mode: AssemblyMode) -> Self {
        self.assembly = mode;
        self
    }

    pub fn with_png_threshold(mut self, n: usize) -> Self {
        self.png_threshold = n;
        self.normalized()
    }

    pub fn with_backoff_jitter_ms(mut self, ms: u64) -> Self {
        self.backoff_jitter_ms = ms;
        self
    }

    pub fn with_rate_limit_penalty_ms(mut self, ms: u64) -> Self {
        self.rate_limit_penalty_ms = ms;
        self
    }

    pub fn with_fallback_batch_delay_ms(mut self, ms: u64) -> Self {
        self.fallback_batch_delay_ms = ms;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Documents loaded per merge batch for a document of `labels` labels
    pub fn merge_batch_size_for(&self, labels: usize) -> usize {
        self.merge_batch_size
            .unwrap_or(if labels > 30 { 20 } else { 15 })
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::new(vec![DEFAULT_BASE_URL.to_string()])
    }
}

/// Split a comma-separated endpoint list, dropping blanks
pub fn parse_base_urls(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
        .collect()
}
