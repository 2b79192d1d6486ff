use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::utils::utils_errors::SwitchoptError;

pub trait ToAndFromRonString: Serialize + DeserializeOwned {
    fn convert_to_ron_string(&self) -> Result<String, SwitchoptError> {
        ron::to_string(self).map_err(|e| SwitchoptError::new_generic_error_str(&format!("Could not serialize object to ron: {}", e), file!(), line!()))
    }
    fn load_from_ron_string(ron_string: &str) -> Result<Self, SwitchoptError> where Self: Sized {
        let load: Result<Self, _> = ron::from_str(ron_string);
        return if let Ok(load) = load { Ok(load) } else {
            Err(SwitchoptError::new_generic_error_str(&format!("Could not load ron string {:?} into correct type.", ron_string), file!(), line!()))
        }
    }
}
impl <T> ToAndFromRonString for T where T: Serialize + DeserializeOwned {  }

pub trait ToAndFromTomlString: Serialize + DeserializeOwned {
    fn convert_to_toml_string(&self) -> Result<String, SwitchoptError> {
        toml::to_string(self).map_err(|e| SwitchoptError::new_generic_error_str(&format!("Could not serialize object to toml: {}", e), file!(), line!()))
    }
    fn load_from_toml_string(toml_string: &str) -> Result<Self, SwitchoptError> where Self: Sized {
        let load: Result<Self, _> = toml::from_str(toml_string);
        return match load {
            Ok(load) => { Ok(load) }
            Err(e) => { Err(SwitchoptError::new_generic_error_str(&format!("Could not load toml string {:?} into correct type: {}", toml_string, e), file!(), line!())) }
        }
    }
}
impl <T> ToAndFromTomlString for T where T: Serialize + DeserializeOwned {  }

pub trait ToAndFromJsonString: Serialize + DeserializeOwned {
    fn convert_to_json_string(&self) -> Result<String, SwitchoptError> {
        serde_json::to_string(self).map_err(|e| SwitchoptError::new_generic_error_str(&format!("Could not serialize object to json: {}", e), file!(), line!()))
    }
    fn load_from_json_string(json_str: &str) -> Result<Self, SwitchoptError> where Self: Sized {
        let load: Result<Self, _> = serde_json::from_str(json_str);
        return match load {
            Ok(load) => { Ok(load) }
            Err(e) => { Err(SwitchoptError::new_generic_error_str(&format!("Could not load json string {:?} into correct type: {}", json_str, e), file!(), line!())) }
        }
    }
}
impl <T> ToAndFromJsonString for T where T: Serialize + DeserializeOwned {  }
