use zatca_sign_derive::Validate;

#[derive(Validate)]
#[validate(not_a_rule)]
pub struct Sample {
    pub name: String,
}

fn main() {}
