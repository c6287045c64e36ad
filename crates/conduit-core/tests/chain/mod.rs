//! 处理链契约测试。
//!
//! - `ordering`：执行顺序、短路与错误透传的性质测试；
//! - `lifecycle`：成员生命周期的顺序与失败语义；
//! - `intercept`：拦截处理器在链内的装配规则。
