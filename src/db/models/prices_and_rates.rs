use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::Serialize;

use crate::db::postgres::schema::prices_and_rates;

#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = prices_and_rates)]
pub struct PricesAndRates {
    pub id: i64,
    pub trove_manager_id: i32,
    pub block_number: i64,
    pub col_usd_price_feed: Option<BigDecimal>,
    pub col_usd_oracle: Option<BigDecimal>,
    pub canonical_rate: Option<BigDecimal>,
    pub underlying_usd_oracle: Option<BigDecimal>,
    pub deviation: Option<BigDecimal>,
}

#[derive(Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = prices_and_rates)]
#[diesel(treat_none_as_null = true)]
pub struct NewPricesAndRates {
    pub trove_manager_id: i32,
    pub block_number: i64,
    pub col_usd_price_feed: Option<BigDecimal>,
    pub col_usd_oracle: Option<BigDecimal>,
    pub canonical_rate: Option<BigDecimal>,
    pub underlying_usd_oracle: Option<BigDecimal>,
    pub deviation: Option<BigDecimal>,
}
