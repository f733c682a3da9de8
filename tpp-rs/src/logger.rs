use env_logger::Env;

/// Initialize logging. Should only be called once.
pub fn init(env_var: &str, default_log_level: &str) {
    if let Err(e) =
        env_logger::Builder::from_env(Env::new().filter_or(env_var, default_log_level)).try_init()
    {
        eprintln!("could not set up env_logger: {e}");
    }
}
