#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mirrorctl::run_cli().await
}
