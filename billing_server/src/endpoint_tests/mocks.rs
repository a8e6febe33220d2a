use billing_engine::{
    db_types::{BinRecord, Country, Merchant, PaymentMethod, PriceGroup, Product, Project},
    traits::{
        CatalogError,
        CatalogLookup,
        ConversionSide,
        CurrencyExchange,
        ExchangeError,
        GeoError,
        GeoIp,
        GeoLocation,
        RateSource,
        ResolvedTax,
        TaxError,
        TaxRates,
    },
};
use bpg_common::Money;
use mockall::mock;

mock! {
    pub Reference {}
    impl CatalogLookup for Reference {
        async fn fetch_project(&self, id: &str) -> Result<Option<Project>, CatalogError>;
        async fn fetch_merchant(&self, id: &str) -> Result<Option<Merchant>, CatalogError>;
        async fn fetch_payment_method(&self, id: &str) -> Result<Option<PaymentMethod>, CatalogError>;
        async fn fetch_payment_methods_for_currency(&self, currency: &str) -> Result<Vec<PaymentMethod>, CatalogError>;
        async fn fetch_country(&self, iso_code: &str) -> Result<Option<Country>, CatalogError>;
        async fn fetch_price_group(&self, id: &str) -> Result<Option<PriceGroup>, CatalogError>;
        async fn fetch_products(&self, merchant_id: &str, ids: &[String]) -> Result<Vec<Product>, CatalogError>;
        async fn fetch_bin(&self, bin: i64) -> Result<Option<BinRecord>, CatalogError>;
    }
    impl CurrencyExchange for Reference {
        async fn convert(&self, from: &str, to: &str, amount: Money, source: RateSource) -> Result<Money, ExchangeError>;
        async fn convert_for_merchant(&self, from: &str, to: &str, amount: Money, side: ConversionSide) -> Result<Money, ExchangeError>;
    }
    impl TaxRates for Reference {
        async fn rate_for<'a, 'b>(&self, country: &'a str, zip: Option<&'b str>) -> Result<ResolvedTax, TaxError>;
    }
    impl GeoIp for Reference {
        async fn locate(&self, ip: &str) -> Result<Option<GeoLocation>, GeoError>;
    }
}
