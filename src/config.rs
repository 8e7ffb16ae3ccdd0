use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;
use std::time::Duration;

use crate::param::DEFAULT_READ_BUFFER_SIZE;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_address")]
    address: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_backlog")]
    backlog: i32,
    #[serde(default = "default_read_buffer_size")]
    read_buffer_size: usize,
    #[serde(default = "default_body_timeout_ms")]
    body_timeout_ms: u64,
    #[serde(default = "default_upstream_timeout_ms")]
    upstream_timeout_ms: u64,
    #[serde(default = "default_cache_capacity")]
    cache_capacity: usize,
    #[serde(default = "default_max_events")]
    max_events: usize,
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1234
}

fn default_backlog() -> i32 {
    100
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_body_timeout_ms() -> u64 {
    5000
}

fn default_upstream_timeout_ms() -> u64 {
    30000
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_max_events() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            backlog: default_backlog(),
            read_buffer_size: default_read_buffer_size(),
            body_timeout_ms: default_body_timeout_ms(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            cache_capacity: default_cache_capacity(),
            max_events: default_max_events(),
        }
    }

    /// 从 TOML 文件加载配置。文件不存在或者格式错误时记录日志并回退到默认配置。
    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => {
                warn!("无法打开配置文件{}：{}，使用默认配置", filename, e);
                return Config::new();
            }
        };
        let mut str_val = String::new();
        if let Err(e) = file.read_to_string(&mut str_val) {
            error!("读取配置文件{}失败：{}，使用默认配置", filename, e);
            return Config::new();
        }
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(str_val: &str) -> Self {
        let mut raw_config: Config = match toml::from_str(str_val) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        if raw_config.cache_capacity == 0 {
            warn!("cache_capacity被设置为0，但目前尚不支持禁用缓存，因此该值将被改为默认值。");
            raw_config.cache_capacity = default_cache_capacity();
        }
        if raw_config.read_buffer_size == 0 {
            warn!("read_buffer_size不能为0，将使用默认值{}。", DEFAULT_READ_BUFFER_SIZE);
            raw_config.read_buffer_size = DEFAULT_READ_BUFFER_SIZE;
        }
        if raw_config.max_events == 0 {
            raw_config.max_events = default_max_events();
        }
        raw_config
    }
}

impl Config {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn body_timeout(&self) -> Duration {
        Duration::from_millis(self.body_timeout_ms)
    }

    /// 等待上游连接与响应的期限，配置为 0 时不设期限。
    pub fn upstream_timeout(&self) -> Option<Duration> {
        match self.upstream_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }
}

// 测试和嵌入场景下用来覆盖单个配置项
impl Config {
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.address = address.to_string();
        self.port = port;
        self
    }

    pub fn with_body_timeout(mut self, timeout: Duration) -> Self {
        self.body_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.upstream_timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        if capacity > 0 {
            self.cache_capacity = capacity;
        }
        self
    }
}
