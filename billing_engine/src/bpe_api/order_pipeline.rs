//! The checkout pipeline and the payment-form support operations.
//!
//! [`CheckoutApi::create_order`] runs the full validation and pricing pipeline and persists the
//! resulting order in `New` status. Everything here is pre-payment: nothing talks to the gateway,
//! and no step mutates an order that has left the form stage.

use std::fmt::Debug;

use bpg_common::Money;
use chrono::Utc;
use log::*;

use crate::{
    bpe_api::{
        order_objects::{
            BillingAddressRequest,
            BillingAddressResponse,
            CreateOrderRequest,
            FormDataRequest,
            FormDataResponse,
            FormPaymentMethod,
            LanguageRequest,
            OrderAmounts,
            OrderResponse,
            PaymentAccountRequest,
            RequestUser,
            StatusResponse,
        },
        ApiError,
        Halt,
    },
    db_types::{
        Address,
        Country,
        Merchant,
        MerchantStatus,
        Order,
        OrderItem,
        OrderIssuer,
        OrderPaymentMethod,
        OrderTax,
        OrderType,
        OrderUser,
        OrderUuid,
        PaymentMethod,
        PaymentMethodKind,
        PrivateOrderStatus,
        Product,
        ProductType,
        Project,
        SellCountType,
    },
    errors::BillingError,
    helpers::{card, ids, signature},
    traits::{CatalogLookup, CurrencyExchange, GeoIp, OrderStore, RateSource, TaxRates},
};

/// Fallback pricing currency when a product has no price in the payer's price group.
const DEFAULT_PRICE_CURRENCY: &str = "USD";

pub struct CheckoutApi<B, R> {
    db: B,
    reference: R,
    order_lifetime_secs: i64,
}

impl<B, R> Debug for CheckoutApi<B, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CheckoutApi")
    }
}

impl<B, R> CheckoutApi<B, R> {
    pub fn new(db: B, reference: R, order_lifetime_secs: i64) -> Self {
        Self { db, reference, order_lifetime_secs }
    }
}

impl<B, R> CheckoutApi<B, R>
where
    B: OrderStore,
    R: CatalogLookup + CurrencyExchange + TaxRates + GeoIp,
{
    /// Runs the checkout pipeline. `raw_body` is the request payload exactly as received; it is
    /// required whenever the request is signed, since the signature covers the raw bytes.
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        raw_body: Option<&[u8]>,
    ) -> Result<OrderResponse, ApiError> {
        match self.run_pipeline(request, raw_body).await {
            Ok(order) => {
                info!("🛒️ Order [{}] created for project {} ({} {})", order.id, order.project.id, order.total_payment_amount, order.currency);
                Ok(OrderResponse::ok(order))
            },
            Err(Halt::Domain(e)) => {
                debug!("🛒️ Order creation rejected: {} ({})", e, e.code());
                Ok(OrderResponse::rejected(e))
            },
            Err(Halt::Infra(e)) => Err(e),
        }
    }

    async fn run_pipeline(&self, request: CreateOrderRequest, raw_body: Option<&[u8]>) -> Result<Order, Halt> {
        let (project, merchant) = self.resolve_project(&request.project_id).await?;
        self.verify_signature(&project, &request, raw_body)?;
        let product_type = request.effective_product_type();
        self.check_request_shape(product_type, &request)?;
        let mut user = self.resolve_user(request.user.clone().unwrap_or_default()).await?;
        let country = self.resolve_country(&user).await?;
        let priced = match product_type {
            ProductType::Simple => self.price_simple(&request)?,
            ProductType::Product | ProductType::Key => {
                self.price_products(&merchant, &request, product_type, country.as_ref()).await?
            },
            ProductType::VirtualCurrency => self.price_virtual_currency(&project, &request, country.as_ref())?,
        };
        if let Some(ext_id) = request.project_order_id.as_deref() {
            if self.db.fetch_order_by_project_order_id(&project.id, ext_id).await?.is_some() {
                return Err(BillingError::ProjectOrderIdDuplicate.into());
            }
        }
        let method = self.check_preselected_method(&request, &project, &priced).await?;
        let tax = match &country {
            Some(c) => self.compute_tax(c, user.address.as_ref().and_then(|a| a.postal_code.as_deref()), priced.amount, &priced.currency).await?,
            None => None,
        };
        if user.id.is_empty() {
            user.id = ids::new_id();
        }
        let order = self.assemble_order(request, project, product_type, priced, user, method, tax)?;
        self.db.insert_order(&order).await?;
        Ok(order)
    }

    async fn resolve_project(&self, project_id: &str) -> Result<(Project, Merchant), Halt> {
        if project_id.is_empty() {
            return Err(BillingError::ProjectIdIncorrect.into());
        }
        let project = self
            .reference
            .fetch_project(project_id)
            .await?
            .ok_or(BillingError::ProjectNotFound)?;
        if !project.can_process_payments() {
            return Err(BillingError::ProjectInactive.into());
        }
        let merchant = self
            .reference
            .fetch_merchant(&project.merchant_id)
            .await?
            .ok_or(BillingError::ProjectMerchantNotFound)?;
        if merchant.is_deleted() || merchant.status != MerchantStatus::AgreementSigned {
            return Err(BillingError::ProjectMerchantInactive.into());
        }
        if !merchant.has_tariff {
            return Err(BillingError::MerchantBadTariffs.into());
        }
        Ok((project, merchant))
    }

    fn verify_signature(
        &self,
        project: &Project,
        request: &CreateOrderRequest,
        raw_body: Option<&[u8]>,
    ) -> Result<(), Halt> {
        if !project.signature_required && request.signature.is_none() {
            return Ok(());
        }
        let claimed = request.signature.as_deref().ok_or(BillingError::SignatureInvalid)?;
        let body = raw_body.ok_or(BillingError::SignatureInvalid)?;
        signature::verify(body, project.secret_key.reveal(), claimed)?;
        Ok(())
    }

    fn check_request_shape(&self, product_type: ProductType, request: &CreateOrderRequest) -> Result<(), Halt> {
        match product_type {
            ProductType::Simple | ProductType::VirtualCurrency => {
                if !request.products.is_empty() {
                    return Err(BillingError::CheckoutWithProducts.into());
                }
                match request.amount {
                    None => return Err(BillingError::CheckoutWithoutAmount.into()),
                    Some(a) if a <= Money::zero() => return Err(BillingError::CheckoutWithoutAmount.into()),
                    Some(_) => {},
                }
                if product_type == ProductType::Simple && request.currency.is_none() {
                    return Err(BillingError::CurrencyIsRequired.into());
                }
            },
            ProductType::Product | ProductType::Key => {
                if request.products.is_empty() {
                    return Err(BillingError::CheckoutWithoutProducts.into());
                }
            },
        }
        Ok(())
    }

    /// Builds the order user from the request payload, enriching the address from the payer IP.
    /// A declared country that contradicts the geo-resolved one is not an error; the order is
    /// flagged so the payment form asks for billing-address confirmation.
    async fn resolve_user(&self, user: RequestUser) -> Result<OrderUser, Halt> {
        let declared = user.country.clone().filter(|c| !c.is_empty());
        let mut resolved = OrderUser {
            id: user.id.unwrap_or_default(),
            external_id: user.external_id,
            email: user.email,
            ip: user.ip,
            locale: user.locale,
            address: declared.clone().map(|country| Address {
                country,
                city: user.city.clone(),
                postal_code: user.zip.clone(),
                state: user.state.clone(),
            }),
            address_data_required: false,
        };
        let located = match resolved.ip.as_deref() {
            Some(ip) => self.reference.locate(ip).await?,
            None => None,
        };
        if let Some(geo) = located {
            match &declared {
                None => {
                    resolved.address = Some(Address {
                        country: geo.country,
                        city: geo.city,
                        postal_code: geo.postal_code,
                        state: geo.state,
                    });
                },
                Some(country) if *country != geo.country => {
                    resolved.address_data_required = true;
                },
                Some(_) => {},
            }
        }
        Ok(resolved)
    }

    /// Resolves the user's country row when a country is known at checkout time. Orders without a
    /// resolvable country proceed untaxed; the billing-address step on the form settles it.
    async fn resolve_country(&self, user: &OrderUser) -> Result<Option<Country>, Halt> {
        let iso = match user.address.as_ref().map(|a| a.country.as_str()).filter(|c| !c.is_empty()) {
            Some(iso) => iso,
            None => return Ok(None),
        };
        let country = self.reference.fetch_country(iso).await?.ok_or(BillingError::CountryNotFound)?;
        if !country.payments_allowed {
            return Err(BillingError::CountryPaymentsRestricted.into());
        }
        Ok(Some(country))
    }

    fn price_simple(&self, request: &CreateOrderRequest) -> Result<PricedOrder, Halt> {
        // Shape checks already guaranteed amount and currency are present.
        let amount = request.amount.ok_or(BillingError::CheckoutWithoutAmount)?;
        let currency = request.currency.clone().ok_or(BillingError::CurrencyIsRequired)?;
        Ok(PricedOrder { amount, currency, items: Vec::new(), platform_id: None, virtual_currency_amount: None })
    }

    async fn price_products(
        &self,
        merchant: &Merchant,
        request: &CreateOrderRequest,
        product_type: ProductType,
        country: Option<&Country>,
    ) -> Result<PricedOrder, Halt> {
        let products = self.reference.fetch_products(&merchant.id, &request.products).await?;
        if products.len() != request.products.len() {
            return Err(BillingError::ProductsInvalid.into());
        }
        let platform_id = if product_type == ProductType::Key {
            let platform = request.platform_id.clone().ok_or(BillingError::NoPlatforms)?;
            if !products.iter().all(|p| p.platforms.contains(&platform)) {
                return Err(BillingError::NoPlatforms.into());
            }
            Some(platform)
        } else {
            None
        };
        let preferred = match (&request.currency, country) {
            (Some(c), _) => c.clone(),
            (None, Some(country)) => {
                let group = self
                    .reference
                    .fetch_price_group(&country.price_group_id)
                    .await?
                    .filter(|g| g.is_active)
                    .ok_or(BillingError::PayerRegionUnknown)?;
                group.currency
            },
            (None, None) => DEFAULT_PRICE_CURRENCY.to_string(),
        };
        let (currency, priced) = Self::price_all_in(&products, &preferred)
            .or_else(|| Self::price_all_in(&products, DEFAULT_PRICE_CURRENCY))
            .ok_or(BillingError::NoProductsCommonCurrency)?;
        let amount = priced.iter().map(|(_, price)| *price).sum::<Money>();
        if amount <= Money::zero() {
            return Err(BillingError::ProductsPrice.into());
        }
        let items = priced
            .into_iter()
            .map(|(p, price)| OrderItem {
                id: p.id.clone(),
                sku: Some(p.sku.clone()),
                name: p.name.clone(),
                description: p.description.clone(),
                amount: price,
                currency: currency.clone(),
                platform_id: platform_id.clone(),
            })
            .collect();
        Ok(PricedOrder { amount, currency, items, platform_id, virtual_currency_amount: None })
    }

    /// All products priced in `currency`, or `None` when any product lacks a price in it.
    fn price_all_in<'a>(products: &'a [Product], currency: &str) -> Option<(String, Vec<(&'a Product, Money)>)> {
        let priced = products
            .iter()
            .map(|p| p.price_in(currency).map(|price| (p, price)))
            .collect::<Option<Vec<_>>>()?;
        Some((currency.to_string(), priced))
    }

    fn price_virtual_currency(
        &self,
        project: &Project,
        request: &CreateOrderRequest,
        country: Option<&Country>,
    ) -> Result<PricedOrder, Halt> {
        let vc = project.virtual_currency.as_ref().ok_or(BillingError::VirtualCurrencyNotFilled)?;
        if vc.prices.is_empty() {
            return Err(BillingError::VirtualCurrencyNotFilled.into());
        }
        let units = request.amount.ok_or(BillingError::CheckoutWithoutAmount)?;
        if vc.sell_count_type == SellCountType::Integral && !units.value().fract().is_zero() {
            return Err(BillingError::VirtualCurrencyFracNotSupported.into());
        }
        if vc.min_purchase_value.is_some_and(|min| units.value() < min) ||
            vc.max_purchase_value.is_some_and(|max| units.value() > max)
        {
            return Err(BillingError::VirtualCurrencyLimits.into());
        }
        let country = country.ok_or(BillingError::VirtualCurrencyUserCountryRequired)?;
        let currency = request.currency.clone().unwrap_or_else(|| country.currency.clone());
        let unit_price = vc
            .prices
            .iter()
            .find(|p| p.currency == currency)
            .ok_or(BillingError::VirtualCurrencyNoPrice)?;
        let amount = (unit_price.amount * units.value()).round_currency(&currency);
        Ok(PricedOrder {
            amount,
            currency,
            items: Vec::new(),
            platform_id: None,
            virtual_currency_amount: Some(units),
        })
    }

    async fn check_preselected_method(
        &self,
        request: &CreateOrderRequest,
        project: &Project,
        priced: &PricedOrder,
    ) -> Result<Option<PaymentMethod>, Halt> {
        let method = match request.payment_method_id.as_deref() {
            Some(id) => self.reference.fetch_payment_method(id).await?.ok_or(BillingError::PaymentMethodNotFound)?,
            None => {
                self.check_project_limits(project, priced.amount, &priced.currency).await?;
                return Ok(None);
            },
        };
        if !method.is_active {
            return Err(BillingError::PaymentMethodInactive.into());
        }
        if !method.payment_system.is_active {
            return Err(BillingError::PaymentSystemInactive.into());
        }
        if method.settings_for(&priced.currency).is_none() {
            return Err(BillingError::PaymentMethodEmptySettings.into());
        }
        if priced.amount < method.min_payment_amount {
            return Err(BillingError::AmountLowerThanMinAllowedMethod.into());
        }
        if priced.amount > method.max_payment_amount {
            return Err(BillingError::AmountGreaterThanMaxAllowedMethod.into());
        }
        self.check_project_limits(project, priced.amount, &priced.currency).await?;
        Ok(Some(method))
    }

    /// Project payment limits, converted into the limit currency when it differs from the order's.
    async fn check_project_limits(&self, project: &Project, amount: Money, currency: &str) -> Result<(), Halt> {
        if project.min_payment_amount.is_none() && project.max_payment_amount.is_none() {
            return Ok(());
        }
        let limits_currency = project.limits_currency.as_deref().unwrap_or(currency);
        let comparable = if limits_currency == currency {
            amount
        } else {
            self.reference.convert(currency, limits_currency, amount, RateSource::Stock).await?.to_precise()
        };
        if project.min_payment_amount.is_some_and(|min| comparable < min) {
            return Err(BillingError::AmountLowerThanMinAllowed.into());
        }
        if project.max_payment_amount.is_some_and(|max| comparable > max) {
            return Err(BillingError::AmountGreaterThanMaxAllowed.into());
        }
        Ok(())
    }

    async fn compute_tax(
        &self,
        country: &Country,
        zip: Option<&str>,
        net: Money,
        currency: &str,
    ) -> Result<Option<OrderTax>, Halt> {
        if !country.vat_enabled {
            return Ok(None);
        }
        let resolved = self.reference.rate_for(&country.iso_code, zip).await?;
        let amount = (net * resolved.rate).round_currency(currency);
        Ok(Some(OrderTax { tax_type: resolved.tax_type, rate: resolved.rate, amount, currency: currency.to_string() }))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_order(
        &self,
        request: CreateOrderRequest,
        project: Project,
        product_type: ProductType,
        priced: PricedOrder,
        user: OrderUser,
        method: Option<PaymentMethod>,
        tax: Option<OrderTax>,
    ) -> Result<Order, Halt> {
        if request.notify_url.is_some() && !project.allow_dynamic_notify_urls {
            return Err(BillingError::DynamicNotifyUrlsNotAllowed.into());
        }
        if (request.redirect_success_url.is_some() || request.redirect_fail_url.is_some()) &&
            !project.allow_dynamic_redirect_urls
        {
            return Err(BillingError::DynamicRedirectUrlsNotAllowed.into());
        }
        let mut snapshot = project.order_snapshot();
        if let Some(url) = request.notify_url {
            snapshot.notify_url = Some(url);
        }
        if let Some(url) = request.redirect_success_url {
            snapshot.redirect_success_url = Some(url);
        }
        if let Some(url) = request.redirect_fail_url {
            snapshot.redirect_fail_url = Some(url);
        }
        let tax_amount = tax.as_ref().map(|t| t.amount).unwrap_or_else(Money::zero);
        let total = priced.amount + tax_amount;
        let created_at = Utc::now();
        Ok(Order {
            id: ids::new_id(),
            uuid: OrderUuid(ids::new_id()),
            order_type: OrderType::Order,
            product_type,
            project: snapshot,
            project_order_id: request.project_order_id,
            description: request.description.unwrap_or_default(),
            order_amount: priced.amount,
            total_payment_amount: total,
            charge_amount: total,
            currency: priced.currency,
            tax,
            user,
            billing_address: None,
            payment_method: method.map(|m| OrderPaymentMethod {
                id: m.id,
                name: m.name,
                handler: m.handler,
                external_id: m.external_id,
                kind: m.kind,
                saved: false,
            }),
            payment_requisites: Default::default(),
            transaction: Default::default(),
            private_status: PrivateOrderStatus::New,
            items: priced.items,
            platform_id: priced.platform_id,
            virtual_currency_amount: priced.virtual_currency_amount,
            issuer: OrderIssuer::default(),
            is_notifications_sent: Default::default(),
            receipt_id: None,
            parent_order_id: None,
            refund: None,
            created_at,
            updated_at: created_at,
            expire_at: Order::expiry_from(created_at, self.order_lifetime_secs),
            refunded_at: None,
            canceled_at: None,
            version: 1,
        })
    }

    //------------------------------------  Payment form ops   -------------------------------------------------------

    /// The data the hosted payment form renders on load. Persists the form context (IP, locale,
    /// referer) onto the order as a side effect.
    pub async fn payment_form_data(
        &self,
        order_uuid: &OrderUuid,
        ctx: FormDataRequest,
    ) -> Result<FormDataResponse, ApiError> {
        let order = match self.fetch_form_order(order_uuid).await {
            Ok(order) => order,
            Err(Halt::Domain(e)) => return Ok(FormDataResponse::rejected(e)),
            Err(Halt::Infra(e)) => return Err(e),
        };
        let mut order = order;
        let mut dirty = false;
        if order.user.ip.is_none() && ctx.ip.is_some() {
            order.user.ip = ctx.ip;
            dirty = true;
        }
        if let Some(locale) = ctx.locale {
            order.user.locale = Some(locale);
            dirty = true;
        }
        if let Some(referer) = ctx.referer {
            order.issuer.url = Some(referer);
            dirty = true;
        }
        if dirty {
            order = self.db.update_order(&order).await?;
        }
        let methods = self
            .reference
            .fetch_payment_methods_for_currency(&order.currency)
            .await?
            .into_iter()
            .filter(|m| m.payment_system.is_active)
            .map(|m| FormPaymentMethod {
                id: m.id,
                name: m.name,
                kind: m.kind,
                amount: order.total_payment_amount,
                currency: order.currency.clone(),
                account_regexp: m.account_regexp,
            })
            .collect();
        Ok(FormDataResponse {
            status: crate::errors::ResponseStatus::Ok,
            message: None,
            order_uuid: Some(order.uuid.to_string()),
            amount: Some(order.total_payment_amount),
            currency: Some(order.currency.clone()),
            methods,
            user_country: order.country().map(String::from),
            user_locale: order.user.locale.clone(),
            user_address_data_required: order.user.address_data_required,
        })
    }

    /// Recomputes tax after the payer chose a billing country on the form.
    pub async fn process_billing_address(
        &self,
        order_uuid: &OrderUuid,
        request: BillingAddressRequest,
    ) -> Result<BillingAddressResponse, ApiError> {
        match self.apply_billing_address(order_uuid, request).await {
            Ok(amounts) => Ok(BillingAddressResponse::ok(amounts)),
            Err(Halt::Domain(e)) => Ok(BillingAddressResponse::rejected(e)),
            Err(Halt::Infra(e)) => Err(e),
        }
    }

    async fn apply_billing_address(
        &self,
        order_uuid: &OrderUuid,
        request: BillingAddressRequest,
    ) -> Result<OrderAmounts, Halt> {
        let mut order = self.fetch_form_order(order_uuid).await?;
        let country = self
            .reference
            .fetch_country(&request.country)
            .await?
            .ok_or(BillingError::CountryNotFound)?;
        if !country.payments_allowed {
            return Err(BillingError::CountryPaymentsRestricted.into());
        }
        if let Some(current_iso) = order.country().map(String::from) {
            if current_iso != country.iso_code {
                let current = self.reference.fetch_country(&current_iso).await?;
                if current.is_some_and(|c| !c.change_allowed) {
                    return Err(BillingError::BillingAddressChangeRestricted.into());
                }
            }
        }
        let tax = self.compute_tax(&country, request.zip.as_deref(), order.order_amount, &order.currency).await?;
        let tax_amount = tax.as_ref().map(|t| t.amount).unwrap_or_else(Money::zero);
        order.tax = tax;
        order.total_payment_amount = order.order_amount + tax_amount;
        order.charge_amount = order.total_payment_amount;
        order.billing_address = Some(Address { country: country.iso_code, postal_code: request.zip, ..Default::default() });
        let order = self.db.update_order(&order).await?;
        debug!("🛒️ Order [{}] billing address set; total is now {} {}", order.id, order.total_payment_amount, order.currency);
        Ok(OrderAmounts {
            order_amount: order.order_amount,
            tax_amount,
            total_payment_amount: order.total_payment_amount,
            currency: order.currency,
        })
    }

    pub async fn payment_form_language_changed(
        &self,
        order_uuid: &OrderUuid,
        request: LanguageRequest,
    ) -> Result<StatusResponse, ApiError> {
        let mut order = match self.fetch_form_order(order_uuid).await {
            Ok(order) => order,
            Err(Halt::Domain(e)) => return Ok(StatusResponse::rejected(e)),
            Err(Halt::Infra(e)) => return Err(e),
        };
        order.user.locale = Some(request.lang);
        self.db.update_order(&order).await?;
        Ok(StatusResponse::ok())
    }

    /// Validates an entered payment account against the chosen method and, for bank cards,
    /// enriches the order with the BIN's brand and issuer country.
    pub async fn payment_form_payment_account_changed(
        &self,
        order_uuid: &OrderUuid,
        request: PaymentAccountRequest,
    ) -> Result<StatusResponse, ApiError> {
        match self.apply_payment_account(order_uuid, request).await {
            Ok(()) => Ok(StatusResponse::ok()),
            Err(Halt::Domain(e)) => Ok(StatusResponse::rejected(e)),
            Err(Halt::Infra(e)) => Err(e),
        }
    }

    async fn apply_payment_account(&self, order_uuid: &OrderUuid, request: PaymentAccountRequest) -> Result<(), Halt> {
        let mut order = self.fetch_form_order(order_uuid).await?;
        let method = self
            .reference
            .fetch_payment_method(&request.method_id)
            .await?
            .ok_or(BillingError::PaymentMethodNotFound)?;
        card::validate_account(&request.account, method.account_regexp.as_deref().unwrap_or_default())?;
        if method.kind == PaymentMethodKind::BankCard {
            if let Some(bin) = card::bin(&request.account).and_then(|b| b.parse::<i64>().ok()) {
                if let Some(record) = self.reference.fetch_bin(bin).await? {
                    order.payment_requisites.insert("card_brand".to_string(), record.card_brand);
                    order.payment_requisites.insert("bank_country_iso".to_string(), record.bank_country_iso);
                    self.db.update_order(&order).await?;
                }
            }
        }
        Ok(())
    }

    /// An order in a form-editable state: exists, not expired, not yet handed to the gateway's
    /// terminal stage.
    async fn fetch_form_order(&self, order_uuid: &OrderUuid) -> Result<Order, Halt> {
        let order = self.db.fetch_order_by_uuid(order_uuid).await?.ok_or(BillingError::OrderNotFound)?;
        if order.is_expired() {
            return Err(BillingError::FormInputTimeExpired.into());
        }
        match order.private_status {
            PrivateOrderStatus::New | PrivateOrderStatus::Pending => Ok(order),
            _ => Err(BillingError::OrderAlreadyComplete.into()),
        }
    }
}

/// Pricing result of the product-type branch of the pipeline.
#[derive(Debug, Clone)]
struct PricedOrder {
    amount: Money,
    currency: String,
    items: Vec<OrderItem>,
    platform_id: Option<String>,
    virtual_currency_amount: Option<Money>,
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        db_types::{ProductPrice, ProjectVirtualCurrency},
        errors::ResponseStatus,
        test_utils::{fixtures, fixtures::TestDirectory, memory::MemoryDatabase},
    };

    fn api(directory: TestDirectory) -> CheckoutApi<MemoryDatabase, TestDirectory> {
        CheckoutApi::new(MemoryDatabase::new(), directory, 1800)
    }

    fn simple_request() -> CreateOrderRequest {
        CreateOrderRequest {
            project_id: "project-1".into(),
            project_order_id: Some("ext-1".into()),
            product_type: None,
            amount: Some("100".parse().unwrap()),
            currency: Some("RUB".into()),
            description: Some("100 gems".into()),
            products: Vec::new(),
            platform_id: None,
            payment_method_id: None,
            user: Some(RequestUser { id: Some("user-1".into()), country: Some("RU".into()), ..Default::default() }),
            notify_url: None,
            redirect_success_url: None,
            redirect_fail_url: None,
            signature: None,
        }
    }

    #[tokio::test]
    async fn simple_order_is_priced_with_vat() {
        let api = api(TestDirectory::default());
        let response = api.create_order(simple_request(), None).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Ok);
        let order = response.order.unwrap();
        assert_eq!(order.order_amount, "100".parse().unwrap());
        assert_eq!(order.tax_amount(), "20".parse().unwrap());
        assert_eq!(order.total_payment_amount, "120".parse().unwrap());
        assert_eq!(order.private_status, PrivateOrderStatus::New);
        assert_eq!(order.tax_rate(), dec!(0.20));
    }

    #[tokio::test]
    async fn unknown_project_is_a_not_found_rejection() {
        let api = api(TestDirectory::default());
        let mut request = simple_request();
        request.project_id = "no-such-project".into();
        let response = api.create_order(request, None).await.unwrap();
        assert_eq!(response.status, ResponseStatus::NotFound);
        assert_eq!(response.message.unwrap().code, "fm000002");
        assert!(response.order.is_none());
    }

    #[tokio::test]
    async fn signed_requests_are_verified_against_the_project_secret() {
        let mut directory = TestDirectory::default();
        directory.projects[0].signature_required = true;
        let api = api(directory);
        let body = br#"{"project_id":"project-1"}"#;
        let mut request = simple_request();
        request.signature = Some(signature::sign(body, "project-secret"));
        let ok = api.create_order(request.clone(), Some(body)).await.unwrap();
        assert_eq!(ok.status, ResponseStatus::Ok);

        request.project_order_id = Some("ext-2".into());
        request.signature = Some(signature::sign(body, "wrong-secret"));
        let rejected = api.create_order(request, Some(body)).await.unwrap();
        assert_eq!(rejected.status, ResponseStatus::Forbidden);
        assert_eq!(rejected.message.unwrap().code, "fm000048");
    }

    #[tokio::test]
    async fn duplicate_project_order_id_is_rejected() {
        let api = api(TestDirectory::default());
        let first = api.create_order(simple_request(), None).await.unwrap();
        assert_eq!(first.status, ResponseStatus::Ok);
        let second = api.create_order(simple_request(), None).await.unwrap();
        assert_eq!(second.message.unwrap().code, "fm000012");
    }

    #[tokio::test]
    async fn product_orders_price_from_the_catalog() {
        let api = api(TestDirectory::default());
        let mut request = simple_request();
        request.amount = None;
        request.currency = None;
        request.products = vec!["prod-1".into()];
        let order = api.create_order(request, None).await.unwrap().order.unwrap();
        assert_eq!(order.product_type, ProductType::Product);
        assert_eq!(order.currency, "RUB");
        assert_eq!(order.order_amount, "650".parse().unwrap());
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].sku.as_deref(), Some("sku-prod-1"));
    }

    #[tokio::test]
    async fn key_orders_validate_the_requested_platform() {
        let api = api(TestDirectory::default());
        let mut request = simple_request();
        request.amount = None;
        request.currency = None;
        request.products = vec!["prod-1".into()];
        request.product_type = Some(ProductType::Key);
        request.platform_id = Some("switch".into());
        let rejected = api.create_order(request.clone(), None).await.unwrap();
        assert_eq!(rejected.message.unwrap().code, "fm000062");

        request.platform_id = Some("steam".into());
        let order = api.create_order(request, None).await.unwrap().order.unwrap();
        assert_eq!(order.platform_id.as_deref(), Some("steam"));
        assert_eq!(order.items[0].platform_id.as_deref(), Some("steam"));
    }

    #[tokio::test]
    async fn restricted_countries_cannot_pay() {
        let api = api(TestDirectory::default());
        let mut request = simple_request();
        request.user = Some(RequestUser { country: Some("BY".into()), ..Default::default() });
        let response = api.create_order(request, None).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Forbidden);
        assert_eq!(response.message.unwrap().code, "fm000027");
    }

    #[tokio::test]
    async fn method_limits_apply_to_preselected_methods() {
        let api = api(TestDirectory::default());
        let mut request = simple_request();
        request.amount = Some("0.5".parse().unwrap());
        request.payment_method_id = Some("method-card".into());
        let response = api.create_order(request, None).await.unwrap();
        assert_eq!(response.message.unwrap().code, "fm000018");
    }

    #[tokio::test]
    async fn virtual_currency_orders_use_the_project_price_list() {
        let mut directory = TestDirectory::default();
        directory.projects[0].virtual_currency = Some(ProjectVirtualCurrency {
            name: "gems".into(),
            sell_count_type: SellCountType::Integral,
            min_purchase_value: Some(dec!(10)),
            max_purchase_value: Some(dec!(10000)),
            prices: vec![ProductPrice {
                region: "russia_and_cis".into(),
                currency: "RUB".into(),
                amount: "1.2".parse().unwrap(),
            }],
        });
        let api = api(directory);
        let mut request = simple_request();
        request.product_type = Some(ProductType::VirtualCurrency);
        request.amount = Some("100".parse().unwrap());
        request.currency = Some("RUB".into());
        let order = api.create_order(request.clone(), None).await.unwrap().order.unwrap();
        assert_eq!(order.order_amount, "120".parse().unwrap());
        assert_eq!(order.virtual_currency_amount, Some("100".parse().unwrap()));

        request.project_order_id = Some("ext-2".into());
        request.amount = Some("10.5".parse().unwrap());
        let fractional = api.create_order(request, None).await.unwrap();
        assert_eq!(fractional.message.unwrap().code, "fm000066");
    }

    #[tokio::test]
    async fn geo_mismatch_requires_address_confirmation() {
        let api = api(TestDirectory::default());
        let mut request = simple_request();
        // Declared FI, but the IP resolves to RU.
        request.user =
            Some(RequestUser { country: Some("FI".into()), ip: Some("127.0.0.1".into()), ..Default::default() });
        let order = api.create_order(request, None).await.unwrap().order.unwrap();
        assert!(order.user.address_data_required);
        assert_eq!(order.country(), Some("FI"));
    }

    #[tokio::test]
    async fn billing_address_change_recomputes_tax() {
        let db = MemoryDatabase::new();
        let api = CheckoutApi::new(db.clone(), TestDirectory::default(), 1800);
        let mut order = fixtures::new_order_fixture();
        order.private_status = PrivateOrderStatus::New;
        order.billing_address = None;
        order.user.address = None;
        order.tax = None;
        order.total_payment_amount = "100".parse().unwrap();
        order.charge_amount = "100".parse().unwrap();
        db.insert_order(&order).await.unwrap();

        let request = BillingAddressRequest { country: "RU".into(), zip: Some("190000".into()) };
        let response = api.process_billing_address(&order.uuid, request).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Ok);
        let amounts = response.amounts.unwrap();
        assert_eq!(amounts.tax_amount, "20".parse().unwrap());
        assert_eq!(amounts.total_payment_amount, "120".parse().unwrap());
    }

    #[tokio::test]
    async fn entered_card_accounts_are_validated_and_bin_enriched() {
        let db = MemoryDatabase::new();
        let api = CheckoutApi::new(db.clone(), TestDirectory::default(), 1800);
        let mut order = fixtures::new_order_fixture();
        order.private_status = PrivateOrderStatus::New;
        db.insert_order(&order).await.unwrap();

        let bad = PaymentAccountRequest { method_id: "method-card".into(), account: "not-a-pan".into() };
        let rejected = api.payment_form_payment_account_changed(&order.uuid, bad).await.unwrap();
        assert_eq!(rejected.message.unwrap().code, "fm000030");

        let good = PaymentAccountRequest { method_id: "method-card".into(), account: "4000000000000002".into() };
        let accepted = api.payment_form_payment_account_changed(&order.uuid, good).await.unwrap();
        assert_eq!(accepted.status, ResponseStatus::Ok);
        let stored = db.fetch_order_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_requisites.get("card_brand").map(String::as_str), Some("VISA"));
    }
}
