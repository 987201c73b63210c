mod handlers;
mod main_menu;

pub use handlers::print_json;
pub use main_menu::show_main_menu;
