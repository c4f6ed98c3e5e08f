use zatca_sign_derive::Validate;

#[derive(Validate)]
#[validate(non_empty, dn_safe)]
pub struct Subject {
    pub common_name: String,
    #[validate(egs_serial)]
    pub serial_number: String,
    #[validate(vat_number)]
    pub organization_identifier: String,
    #[validate(invoice_type)]
    pub invoice_type: String,
}

fn main() {
    let ok = Subject::new(
        "TST-886431145-399999999900003".into(),
        "1-TST|2-TST|3-ed22f1d8-e6a2-1118-9b58-d9a8f11e445f".into(),
        "399999999900003".into(),
        "1100".into(),
    );
    assert!(ok.is_ok());

    let empty = Subject::new(" ".into(), "1-a|2-b|3-c".into(), "399999999900003".into(), "1100".into());
    assert_eq!(empty.err().as_deref(), Some("common_name must be non-empty"));

    let dn = Subject::new("a,b".into(), "1-a|2-b|3-c".into(), "399999999900003".into(), "1100".into());
    assert!(dn.is_err());

    let serial = Subject::new("a".into(), "1-a|2-b".into(), "399999999900003".into(), "1100".into());
    assert!(serial.is_err());

    let vat = Subject::new("a".into(), "1-a|2-b|3-c".into(), "300000000000001".into(), "1100".into());
    assert!(vat.is_err());

    let kind = Subject::new("a".into(), "1-a|2-b|3-c".into(), "399999999900003".into(), "1200".into());
    assert!(kind.is_err());
}
