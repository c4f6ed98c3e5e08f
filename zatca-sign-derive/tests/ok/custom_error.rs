use zatca_sign_derive::Validate;

#[derive(Debug, PartialEq)]
enum SubjectError {
    Invalid { field: &'static str, reason: String },
}

impl From<(&'static str, String)> for SubjectError {
    fn from((field, reason): (&'static str, String)) -> Self {
        SubjectError::Invalid { field, reason }
    }
}

#[derive(Validate)]
#[validate_error(SubjectError)]
#[validate(non_empty)]
pub struct Subject {
    pub organization_name: String,
}

fn main() {
    assert!(Subject::new("Maximum Speed Tech Supply LTD".into()).is_ok());
    assert_eq!(
        Subject::new("".into()).err(),
        Some(SubjectError::Invalid {
            field: "organization_name",
            reason: "must be non-empty".into(),
        })
    );
}
