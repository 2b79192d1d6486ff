use strum::IntoEnumIterator;

pub struct EnumUtils;
impl EnumUtils {
    pub fn get_all_variants_of_enum<T: IntoEnumIterator>() -> Vec<T> {
        T::iter().collect()
    }
}
