mod fetch_unit;
mod pair;
mod price_record;

pub use fetch_unit::FetchUnit;
pub use pair::{load_pairs, CurrencyPair};
pub use price_record::PriceRecord;
