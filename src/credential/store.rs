use crate::config::Config;
use crate::credential::types::Credential;
use anyhow::{Context, anyhow};
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 凭证池。
///
/// 读路径（每次分析都会读）通过 ArcSwap 无锁拿到有序快照；
/// 写路径（管理接口）串行化后整体替换快照并落盘。
#[derive(Debug)]
pub struct Store {
    file_path: PathBuf,
    production: bool,
    env_keys: Vec<(String, String)>,
    pool: ArcSwap<Vec<Credential>>,
    write_lock: Mutex<()>,
}

impl Store {
    pub fn new(cfg: &Config) -> Self {
        Self {
            file_path: cfg.keys_file(),
            production: cfg.production,
            env_keys: cfg.env_keys.clone(),
            pool: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// 仅存在于内存中的凭证池（不读写文件）。
    pub fn in_memory(credentials: Vec<Credential>) -> Self {
        Self {
            file_path: PathBuf::new(),
            production: true,
            env_keys: Vec::new(),
            pool: ArcSwap::from_pointee(credentials),
            write_lock: Mutex::new(()),
        }
    }

    /// 生产模式只读环境变量；否则优先读 keys 文件，文件不存在时退回环境变量。
    pub async fn load(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        if self.production {
            let creds = self.env_credentials();
            tracing::info!("生产模式：从环境变量加载 {} 个凭证", creds.len());
            self.pool.store(Arc::new(creds));
            return Ok(());
        }

        let data = match tokio::fs::read(&self.file_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let creds = self.env_credentials();
                tracing::info!(
                    "未找到 {}，从环境变量加载 {} 个凭证",
                    self.file_path.display(),
                    creds.len()
                );
                self.pool.store(Arc::new(creds));
                return Ok(());
            }
            Err(e) => return Err(e).context("读取 gemini-keys.json 失败"),
        };

        let creds = match parse_keys_file(&data) {
            Ok(v) => v,
            Err(e) => {
                // 文件损坏时退回环境变量，保证仍有机会服务。
                self.pool.store(Arc::new(self.env_credentials()));
                return Err(e).context("解析 gemini-keys.json 失败");
            }
        };
        tracing::info!(
            "从 {} 加载 {} 个凭证",
            self.file_path.display(),
            creds.len()
        );
        self.pool.store(Arc::new(creds));
        Ok(())
    }

    /// 当前有序快照（包含已清空的凭证）。
    pub fn snapshot(&self) -> Arc<Vec<Credential>> {
        self.pool.load_full()
    }

    /// 有密钥的凭证，保持配置顺序。
    pub fn usable(&self) -> Vec<Credential> {
        self.pool
            .load()
            .iter()
            .filter(|c| c.is_usable())
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.pool.load().len()
    }

    pub fn working_count(&self) -> usize {
        self.pool.load().iter().filter(|c| c.is_usable()).count()
    }

    /// id → 掩码后的密钥，保持配置顺序。
    pub fn masked(&self) -> serde_json::Map<String, serde_json::Value> {
        self.pool
            .load()
            .iter()
            .map(|c| (c.id.clone(), serde_json::Value::from(c.masked_secret())))
            .collect()
    }

    /// 覆写已有凭证或在末尾追加新凭证；空值表示停用，不会删除条目。
    pub async fn update(&self, updates: Vec<(String, String)>) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut next: Vec<Credential> = self.pool.load().as_ref().clone();
        for (id, secret) in updates {
            let id = id.trim().to_string();
            if id.is_empty() {
                return Err(anyhow!("凭证 id 不能为空"));
            }
            let secret = secret.trim().to_string();
            match next.iter_mut().find(|c| c.id == id) {
                Some(existing) => existing.secret = secret,
                None => next.push(Credential::new(id.clone(), secret)),
            }
            tracing::info!(credential_id = %id, "凭证已更新");
        }

        if !self.production {
            save_keys_file(&self.file_path, &next).await?;
        }
        self.pool.store(Arc::new(next));
        Ok(())
    }

    fn env_credentials(&self) -> Vec<Credential> {
        self.env_keys
            .iter()
            .map(|(id, secret)| Credential::new(id.clone(), secret.clone()))
            .collect()
    }
}

fn parse_keys_file(data: &[u8]) -> anyhow::Result<Vec<Credential>> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(data)?;
    Ok(map
        .into_iter()
        .filter_map(|(id, v)| v.as_str().map(|s| Credential::new(id, s.trim())))
        .collect())
}

async fn save_keys_file(path: &Path, creds: &[Credential]) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .context("创建数据目录失败")?;
    }
    let map: serde_json::Map<String, serde_json::Value> = creds
        .iter()
        .map(|c| (c.id.clone(), serde_json::Value::from(c.secret.clone())))
        .collect();
    let data = serde_json::to_vec_pretty(&map).context("序列化 gemini-keys.json 失败")?;
    tokio::fs::write(path, data)
        .await
        .context("写入 gemini-keys.json 失败")
}
