pub use super::user::Entity as User;
pub use super::video::Entity as Video;
