pub mod pricing_model;

pub use self::pricing_model::{PricingModel, PRICE_DECIMALS};
