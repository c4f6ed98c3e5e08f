use zatca_sign_derive::Validate;

#[derive(Validate)]
pub struct Sample {
    #[validate(non_empty)]
    pub count: u32,
}

fn main() {}
