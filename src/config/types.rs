use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub parser: ParserConfig,

    #[serde(default)]
    pub fragment: FragmentConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParserConfig {
    /// Fail on the first structural problem instead of recovering
    #[serde(default)]
    pub strict: bool,

    /// Bytes read from disk per parser step
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            strict: false,
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

fn default_read_chunk_size() -> usize {
    mp4forge_media::mp4::DEFAULT_READ_CHUNK
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FragmentConfig {
    /// Major brand of fragmented output
    #[serde(default = "default_major_brand")]
    pub major_brand: String,

    /// Compatible brands of fragmented output
    #[serde(default = "default_brands")]
    pub brands: Vec<String>,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            major_brand: default_major_brand(),
            brands: default_brands(),
        }
    }
}

fn default_major_brand() -> String {
    "iso5".to_string()
}

fn default_brands() -> Vec<String> {
    vec!["iso5".to_string(), "iso6".to_string(), "mp41".to_string()]
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Print reports as JSON
    #[serde(default)]
    pub json: bool,
}
