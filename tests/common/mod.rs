use walog::fs::MemoryFilesystem;
use walog::{Log, Options};

pub fn enable_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

pub fn mem_log(options: Options) -> Log<MemoryFilesystem> {
    Log::open(MemoryFilesystem::new(), "/log".into(), options).unwrap()
}
