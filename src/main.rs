fn main() -> anyhow::Result<()> {
    diary::cli::run()
}
