// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 单线程缓存正向代理
//!
//! 进程入口只负责外围装配：
//! - 通过 log4rs 从外部 YAML 初始化日志
//! - 从 TOML 文件读取监听地址、积压队列、超时与缓存容量
//! - 构造唯一的 `Server` 并进入事件循环
//!
//! 代理逻辑本身全部位于库中（见 `server` 与 `connection` 模块）。

use caching_proxy::{Config, Server};
use log::{error, info};

const LOG_CONFIG: &str = "config/log4rs.yaml";
const PROXY_CONFIG: &str = "config/proxy.toml";

fn main() {
    // 1. 初始化日志系统：日志级别、格式与输出目的地全部由外部 YAML 决定
    if let Err(e) = log4rs::init_file(LOG_CONFIG, Default::default()) {
        eprintln!("无法加载日志配置{}：{}", LOG_CONFIG, e);
    }

    // 2. 环境配置加载
    let config = Config::from_toml(PROXY_CONFIG);
    info!("配置文件已载入");
    info!(
        "监听地址：{}:{}，缓存容量：{}",
        config.address(),
        config.port(),
        config.cache_capacity()
    );

    // 3. 绑定端口并创建事件循环
    let mut server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("无法启动代理：{}", e);
            std::process::exit(1);
        }
    };

    // 4. 主事件循环，只在轮询本身失败时退出
    if let Err(e) = server.run() {
        error!("事件循环异常退出：{}", e);
        std::process::exit(1);
    }
}
