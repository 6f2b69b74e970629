fn main() {
    std::process::exit(timemanager_cli::run());
}
