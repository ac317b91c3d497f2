#[tokio::main]
async fn main() -> anyhow::Result<()> {
    todo::start_server().await
}
