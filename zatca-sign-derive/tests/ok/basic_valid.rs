use zatca_sign_derive::Validate;

#[derive(Validate)]
pub struct Branch {
    pub name: String,
    #[validate(is_country_code)]
    pub country: String,
}

fn main() {
    assert!(Branch::new("Riyadh Branch".into(), "SA".into()).is_ok());
    assert!(Branch::new("Riyadh Branch".into(), "sa".into()).is_ok());

    let err = Branch::new("Riyadh Branch".into(), "XX".into()).err();
    assert_eq!(
        err.as_deref(),
        Some("country must be an ISO 3166 alpha-2 country code")
    );
}
