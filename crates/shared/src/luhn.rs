//! 订单号 Luhn 校验
//!
//! 订单号只在上传时校验一次，对账流程不会重新校验。

/// 订单号是否为合法的 Luhn 数字串
///
/// 空串和包含非数字字符的串一律视为无效
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let sum: u32 = number
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 { double(digit) } else { digit }
        })
        .sum();

    sum % 10 == 0
}

/// 为数字前缀计算 Luhn 校验位
///
/// 前缀包含非数字字符时返回 None
pub fn check_digit(payload: &str) -> Option<u8> {
    if !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let sum: u32 = payload
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 0 { double(digit) } else { digit }
        })
        .sum();

    Some(((10 - sum % 10) % 10) as u8)
}

fn double(digit: u32) -> u32 {
    let d = digit * 2;
    if d > 9 { d - 9 } else { d }
}
