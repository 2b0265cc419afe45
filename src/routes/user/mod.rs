mod directory;
mod handler;
mod model;

pub use directory::{MemoryUserDirectory, UserDirectory, UserRecord};
pub use handler::{
    PROFILE_CACHE_PREFIX, check_token, get_profile, login, refresh_token, register, set_role,
    update_nickname,
};
