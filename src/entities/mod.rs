pub mod user;
pub mod video;

pub use user::Entity as User;
pub use video::Entity as Video;

pub mod prelude;
