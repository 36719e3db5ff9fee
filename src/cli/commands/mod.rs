mod ask;
mod config;
mod index;
mod search;
mod status;
mod tools;

pub use ask::AskArgs;
pub use config::ConfigCommand;
pub use index::IndexCommand;
pub use search::SearchArgs;

pub use ask::handle_ask;
pub use config::handle_config;
pub use index::handle_index;
pub use search::handle_search;
pub use status::handle_status;
pub use tools::handle_tools;
