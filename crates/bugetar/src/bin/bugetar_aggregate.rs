//! bugetar-aggregate - Aggregate budget execution data.

fn main() -> std::process::ExitCode {
    bugetar::cmd::aggregate::main()
}
