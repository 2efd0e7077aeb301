//! 跨设备授权请求的签名校验
//!
//! 对参与字段做 HMAC-SHA256：字段按键名排序后以 `key=value` 形式
//! 用 `&` 拼接为规范串，密钥为配置的应用密钥，签名取 hex 摘要。
//! 校验通过 Mac::verify_slice 完成（常数时间比较）。

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 构造规范串：字段按键名排序，`key=value` 以 `&` 连接
fn canonicalize(fields: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = fields.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);

    sorted
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// 计算字段签名（hex 摘要）
pub fn sign_fields(fields: &[(&str, String)], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonicalize(fields).as_bytes());

    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// 校验字段签名
pub fn verify_signature(fields: &[(&str, String)], secret: &str, sign: &str) -> bool {
    let expected = match decode_hex(sign) {
        Some(bytes) => bytes,
        None => return false,
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonicalize(fields).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&input[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<(&'static str, String)> {
        vec![
            ("device_key", "d1".to_string()),
            ("app_key", "app-1".to_string()),
            ("start_time", "1000".to_string()),
        ]
    }

    #[test]
    fn test_sign_and_verify() {
        let sign = sign_fields(&fields(), "secret-1");
        assert!(verify_signature(&fields(), "secret-1", &sign));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let mut reordered = fields();
        reordered.reverse();

        let sign = sign_fields(&fields(), "secret-1");
        assert!(verify_signature(&reordered, "secret-1", &sign));
    }

    #[test]
    fn test_wrong_secret_or_tampered_field_fails() {
        let sign = sign_fields(&fields(), "secret-1");

        assert!(!verify_signature(&fields(), "secret-2", &sign));

        let mut tampered = fields();
        tampered[0].1 = "d2".to_string();
        assert!(!verify_signature(&tampered, "secret-1", &sign));
    }

    #[test]
    fn test_garbage_signature_is_rejected() {
        assert!(!verify_signature(&fields(), "secret-1", "zz"));
        assert!(!verify_signature(&fields(), "secret-1", "abc"));
        assert!(!verify_signature(&fields(), "secret-1", ""));
    }
}
