use agora::config::{AgoraConfig, StoreConfig};
use agora::store::open_store;

/// Open the configured store, creating its schema
pub async fn execute(config: &AgoraConfig) -> Result<(), Box<dyn std::error::Error>> {
    open_store(&config.store).await?;

    match &config.store {
        StoreConfig::Memory => {
            println!("ℹ️  Memory backend configured: nothing to migrate");
        }
        StoreConfig::Sqlite { url, .. } => {
            println!("✅ Schema ready: {}", url);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrate_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("agora.db");

        let config = AgoraConfig {
            store: StoreConfig::Sqlite {
                url: format!("sqlite://{}", db_path.display()),
                max_connections: 1,
            },
            ..Default::default()
        };

        execute(&config).await.unwrap();
        assert!(db_path.exists());

        // Re-running is harmless
        execute(&config).await.unwrap();
    }
}
