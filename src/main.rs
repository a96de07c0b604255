fn main() -> std::process::ExitCode {
    fieldsheet_lib::run()
}
