pub mod cryptobot;
pub mod crystalpay;
pub mod lolzteam;

pub use cryptobot::{CryptoBotConfig, CryptoBotGateway};
pub use crystalpay::{CrystalPayConfig, CrystalPayGateway};
pub use lolzteam::{LolzTeamConfig, LolzTeamGateway};
