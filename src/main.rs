fn main() -> anyhow::Result<()> {
    // .env may carry AVATAR_SERVER_URL and friends; absence is fine.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(dasom::run())
}
