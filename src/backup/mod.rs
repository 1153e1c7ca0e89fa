pub mod archive;
pub mod autosave;
pub mod mirror;
pub mod orchestrator;
pub mod progress;
pub mod result_error;
pub mod retention;
pub mod schedule;
pub mod settings;
pub mod token;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
