fn main() -> anyhow::Result<()> {
    console_gate::admin::run()
}
