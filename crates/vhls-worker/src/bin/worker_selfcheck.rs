use std::path::Path;
use std::process::Command;

use vhls_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_tool("ffmpeg")?;
    ensure_tool("ffprobe")?;
    ensure_env_present(&[
        "GOOGLE_APPLICATION_CREDENTIALS",
        "R2_ENDPOINT_URL",
        "R2_ACCESS_KEY_ID",
        "R2_SECRET_ACCESS_KEY",
        "R2_BUCKET_NAME",
    ])?;
    ensure_env_any(&["GCP_PROJECT_ID", "FIREBASE_PROJECT_ID"])?;

    let queue_backend = if std::env::var("REDIS_URL").map(|v| !v.is_empty()).unwrap_or(false) {
        "redis"
    } else {
        "local"
    };
    println!("worker-selfcheck: queue backend would be '{}'", queue_backend);

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_tool(tool: &str) -> anyhow::Result<()> {
    let output = Command::new(tool)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", tool, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            tool,
            output.status
        ));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}

fn ensure_env_any(vars: &[&str]) -> anyhow::Result<()> {
    if vars.iter().any(|var| std::env::var(var).is_ok()) {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "none of the env vars {} are set",
        vars.join(", ")
    ))
}
