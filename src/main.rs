// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 多线程 GET/PUT 文件服务器
//!
//! 启动流程：
//! - 通过 log4rs 从外部 YAML 初始化日志（审计日志单独输出到 stderr）
//! - 读取 TOML 配置（第一个命令行参数，缺省为 `config/development.toml`）
//! - 绑定端口，启动接收线程与工作线程池
//! - 在主线程上运行管理控制台（stop / status / help）
//!
//! 任何初始化失败都会打印诊断信息并以非零状态码退出。

use httpserver::{Config, Server, ServerHandle};

use log::{info, warn};
use log4rs;

use std::{
    env,
    io::{self, BufRead},
    process,
};

const LOG_CONFIG: &str = "config/log4rs.yaml";
const DEFAULT_CONFIG: &str = "config/development.toml";

fn main() {
    // 1. 日志系统
    if let Err(e) = log4rs::init_file(LOG_CONFIG, Default::default()) {
        eprintln!("无法初始化日志系统（{}）：{}", LOG_CONFIG, e);
        process::exit(1);
    }

    // 2. 配置
    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match Config::from_toml(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("无法加载配置文件{}：{}", path, e);
            process::exit(1);
        }
    };
    info!("配置文件{}已载入", path);
    info!("www root: {}", config.www_root());

    // 3. 端口、队列、注册表与线程池
    let handle = match Server::bind(&config).and_then(Server::start) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("服务器启动失败：{}", e);
            process::exit(1);
        }
    };
    info!("服务器已启动，监听地址：{}", handle.local_addr());

    // 4. 管理控制台
    console(handle);
}

/// 从标准输入读取运维指令，直到收到 `stop` 或输入流结束
fn console(handle: ServerHandle) {
    let stdin = io::stdin();
    let mut input = String::new();
    loop {
        input.clear();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => {
                info!("标准输入已关闭，控制台退出，服务器继续运行");
                handle.join();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("读取控制台输入失败：{}，控制台退出", e);
                handle.join();
                return;
            }
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器将在处理完已接收的连接后关闭...");
                handle.shutdown();
                return;
            }
            "help" => {
                println!("== Webserver Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "status" => {
                println!("== Webserver 状态 ===");
                println!("监听地址: {}", handle.local_addr());
                println!("当前活跃连接数: {}", handle.stats().active_connections());
                println!("排队中的连接数: {}", handle.queued());
                println!("已处理连接数: {}", handle.stats().served());
                println!("被引用的资源数: {}", handle.registry().len());
                println!("锁策略: {:?}", handle.registry().priority());
                println!("====================");
            }
            "" => {}
            cmd => {
                println!("无效的命令：{}", cmd);
            }
        }
    }
}
