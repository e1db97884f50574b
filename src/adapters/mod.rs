pub mod authentik;
pub mod matrix;
pub mod traits;

pub use authentik::{AuthentikClient, AuthentikConfig};
pub use matrix::{MatrixClient, MatrixConfig};
pub use traits::{AddressSource, GroupMember, IdentityProvider, RoomDirectory};
