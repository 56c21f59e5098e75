//! CUDA neighborhood kernels: dot, gather, inverse gather and bias gradient.
//!
//! All four kernels share one signature,
//! `(a, b, rpb, out, table, params, total)`, and map one thread to one
//! output element with a grid-stride loop. Geometry arrives in `params`
//! (layout given by the `P_*` offsets below), window bounds in `table`
//! (see `WindowTable::packed_u32`).

use natten_tensor::DType;

/// Entry points defined by [`NEIGHBORHOOD_CUDA`].
pub const KERNEL_NAMES: [&str; 4] = ["nbhd_dot", "nbhd_gather", "nbhd_inverse", "nbhd_rpb_grad"];

/// Offsets into the `u32` parameter buffer.
pub const P_BATCH: usize = 0;
pub const P_HEADS: usize = 1;
pub const P_EXTENT: usize = 2;
pub const P_KERNEL: usize = 5;
pub const P_DILATION: usize = 8;
pub const P_A_CH: usize = 11;
pub const P_B_CH: usize = 12;
pub const P_A_STRIDES: usize = 13;
pub const P_B_STRIDES: usize = 19;
pub const P_HAS_BIAS: usize = 25;
pub const PARAMS_LEN: usize = 26;

const F32_PRELUDE: &str = r#"
typedef float scalar_t;
typedef float acc_t;
__device__ __forceinline__ acc_t to_acc(scalar_t x) { return x; }
__device__ __forceinline__ scalar_t from_acc(acc_t x) { return x; }
"#;

const F64_PRELUDE: &str = r#"
typedef double scalar_t;
typedef double acc_t;
__device__ __forceinline__ acc_t to_acc(scalar_t x) { return x; }
__device__ __forceinline__ scalar_t from_acc(acc_t x) { return x; }
"#;

// Half values travel as raw bits; conversion goes through PTX so no
// headers are needed at NVRTC time.
const F16_PRELUDE: &str = r#"
typedef unsigned short scalar_t;
typedef float acc_t;
__device__ __forceinline__ acc_t to_acc(scalar_t x) {
    float f;
    asm("cvt.f32.f16 %0, %1;" : "=f"(f) : "h"(x));
    return f;
}
__device__ __forceinline__ scalar_t from_acc(acc_t x) {
    unsigned short h;
    asm("cvt.rn.f16.f32 %0, %1;" : "=h"(h) : "f"(x));
    return h;
}
"#;

/// Kernel bodies, written against `scalar_t`, `acc_t`, `to_acc` and
/// `from_acc` from a prelude.
pub const NEIGHBORHOOD_CUDA: &str = r#"
typedef unsigned int u32;
typedef unsigned long long u64;

#define P_BATCH 0
#define P_HEADS 1
#define P_EXTENT 2
#define P_KERNEL 5
#define P_DILATION 8
#define P_A_CH 11
#define P_B_CH 12
#define P_A_STRIDES 13
#define P_B_STRIDES 19
#define P_HAS_BIAS 25

#define T_START 0
#define T_BSTART 1
#define T_BEND 2
#define T_RPB 3

__device__ __forceinline__ u32 table_at(
    const u32* table, const u32* params, int axis, int field, u32 i)
{
    u32 base = 0;
    for (int a = 0; a < axis; ++a) base += 4u * params[P_EXTENT + a];
    return table[base + (u32)field * params[P_EXTENT + axis] + i];
}

__device__ __forceinline__ u64 operand_offset(
    const u32* s, u32 n, u32 h, u32 p0, u32 p1, u32 p2)
{
    return (u64)n * s[0] + (u64)h * s[1]
         + (u64)p0 * s[2] + (u64)p1 * s[3] + (u64)p2 * s[4];
}

__device__ __forceinline__ void split_row(
    const u32* params, u64 row, u32* n, u32* h, u32* p)
{
    u64 e1 = params[P_EXTENT + 1];
    u64 e2 = params[P_EXTENT + 2];
    u64 positions = (u64)params[P_EXTENT] * e1 * e2;
    u64 pos = row % positions;
    u64 bh = row / positions;
    p[2] = (u32)(pos % e2);
    p[1] = (u32)((pos / e2) % e1);
    p[0] = (u32)(pos / (e1 * e2));
    *h = (u32)(bh % params[P_HEADS]);
    *n = (u32)(bh / params[P_HEADS]);
}

extern "C" __global__ void nbhd_dot(
    const scalar_t* __restrict__ a,
    const scalar_t* __restrict__ b,
    const scalar_t* __restrict__ rpb,
    scalar_t* __restrict__ out,
    const u32* __restrict__ table,
    const u32* __restrict__ params,
    const u64 total)
{
    const u32 k0 = params[P_KERNEL], k1 = params[P_KERNEL + 1], k2 = params[P_KERNEL + 2];
    const u64 taps = (u64)k0 * k1 * k2;
    const u32* a_s = params + P_A_STRIDES;
    const u32* b_s = params + P_B_STRIDES;

    for (u64 idx = (u64)blockIdx.x * blockDim.x + threadIdx.x; idx < total;
         idx += (u64)gridDim.x * blockDim.x) {
        u32 n, h, p[3];
        split_row(params, idx / taps, &n, &h, p);
        u32 tap = (u32)(idx % taps);
        u32 t[3] = { tap / (k1 * k2), (tap / k2) % k1, tap % k2 };
        u32 key[3];
        for (int ax = 0; ax < 3; ++ax)
            key[ax] = table_at(table, params, ax, T_START, p[ax]) + t[ax] * params[P_DILATION + ax];

        u64 a_off = operand_offset(a_s, n, h, p[0], p[1], p[2]);
        u64 b_off = operand_offset(b_s, n, h, key[0], key[1], key[2]);
        acc_t acc = 0;
        for (u32 c = 0; c < params[P_A_CH]; ++c)
            acc += to_acc(a[a_off + (u64)c * a_s[5]]) * to_acc(b[b_off + (u64)c * b_s[5]]);

        if (params[P_HAS_BIAS]) {
            u32 s1 = 2 * k1 - 1, s2 = 2 * k2 - 1;
            u64 volume = (u64)(2 * k0 - 1) * s1 * s2;
            u32 r0 = table_at(table, params, 0, T_RPB, p[0]) + t[0];
            u32 r1 = table_at(table, params, 1, T_RPB, p[1]) + t[1];
            u32 r2 = table_at(table, params, 2, T_RPB, p[2]) + t[2];
            acc += to_acc(rpb[h * volume + ((u64)r0 * s1 + r1) * s2 + r2]);
        }
        out[idx] = from_acc(acc);
    }
}

extern "C" __global__ void nbhd_gather(
    const scalar_t* __restrict__ a,
    const scalar_t* __restrict__ b,
    const scalar_t* __restrict__ rpb,
    scalar_t* __restrict__ out,
    const u32* __restrict__ table,
    const u32* __restrict__ params,
    const u64 total)
{
    const u32 k0 = params[P_KERNEL], k1 = params[P_KERNEL + 1], k2 = params[P_KERNEL + 2];
    const u32 d0 = params[P_DILATION], d1 = params[P_DILATION + 1], d2 = params[P_DILATION + 2];
    const u32 channels = params[P_B_CH];
    const u32* a_s = params + P_A_STRIDES;
    const u32* b_s = params + P_B_STRIDES;

    for (u64 idx = (u64)blockIdx.x * blockDim.x + threadIdx.x; idx < total;
         idx += (u64)gridDim.x * blockDim.x) {
        u32 n, h, p[3];
        split_row(params, idx / channels, &n, &h, p);
        u32 c = (u32)(idx % channels);
        u32 s0 = table_at(table, params, 0, T_START, p[0]);
        u32 s1 = table_at(table, params, 1, T_START, p[1]);
        u32 s2 = table_at(table, params, 2, T_START, p[2]);
        u64 w_off = operand_offset(a_s, n, h, p[0], p[1], p[2]);

        acc_t acc = 0;
        u32 tap = 0;
        for (u32 t0 = 0; t0 < k0; ++t0)
        for (u32 t1 = 0; t1 < k1; ++t1)
        for (u32 t2 = 0; t2 < k2; ++t2, ++tap) {
            u64 v_off = operand_offset(b_s, n, h, s0 + t0 * d0, s1 + t1 * d1, s2 + t2 * d2);
            acc += to_acc(a[w_off + (u64)tap * a_s[5]]) * to_acc(b[v_off + (u64)c * b_s[5]]);
        }
        out[idx] = from_acc(acc);
    }
}

extern "C" __global__ void nbhd_inverse(
    const scalar_t* __restrict__ a,
    const scalar_t* __restrict__ b,
    const scalar_t* __restrict__ rpb,
    scalar_t* __restrict__ out,
    const u32* __restrict__ table,
    const u32* __restrict__ params,
    const u64 total)
{
    const u32 k0 = params[P_KERNEL], k1 = params[P_KERNEL + 1], k2 = params[P_KERNEL + 2];
    const u32 d0 = params[P_DILATION], d1 = params[P_DILATION + 1], d2 = params[P_DILATION + 2];
    const u32 channels = params[P_B_CH];
    const u32* a_s = params + P_A_STRIDES;
    const u32* b_s = params + P_B_STRIDES;

    for (u64 idx = (u64)blockIdx.x * blockDim.x + threadIdx.x; idx < total;
         idx += (u64)gridDim.x * blockDim.x) {
        u32 n, h, i[3];
        split_row(params, idx / channels, &n, &h, i);
        u32 c = (u32)(idx % channels);

        acc_t acc = 0;
        u32 e0 = table_at(table, params, 0, T_BEND, i[0]);
        u32 e1 = table_at(table, params, 1, T_BEND, i[1]);
        u32 e2 = table_at(table, params, 2, T_BEND, i[2]);
        for (u32 q0 = table_at(table, params, 0, T_BSTART, i[0]); q0 < e0; q0 += d0) {
            u32 w0 = table_at(table, params, 0, T_START, q0);
            if (i[0] < w0 || (i[0] - w0) / d0 >= k0) continue;
            u32 t0 = (i[0] - w0) / d0;
            for (u32 q1 = table_at(table, params, 1, T_BSTART, i[1]); q1 < e1; q1 += d1) {
                u32 w1 = table_at(table, params, 1, T_START, q1);
                if (i[1] < w1 || (i[1] - w1) / d1 >= k1) continue;
                u32 t1 = (i[1] - w1) / d1;
                for (u32 q2 = table_at(table, params, 2, T_BSTART, i[2]); q2 < e2; q2 += d2) {
                    u32 w2 = table_at(table, params, 2, T_START, q2);
                    if (i[2] < w2 || (i[2] - w2) / d2 >= k2) continue;
                    u32 t2 = (i[2] - w2) / d2;
                    u32 tap = (t0 * k1 + t1) * k2 + t2;
                    u64 w_off = operand_offset(a_s, n, h, q0, q1, q2) + (u64)tap * a_s[5];
                    u64 v_off = operand_offset(b_s, n, h, q0, q1, q2) + (u64)c * b_s[5];
                    acc += to_acc(a[w_off]) * to_acc(b[v_off]);
                }
            }
        }
        out[idx] = from_acc(acc);
    }
}

extern "C" __global__ void nbhd_rpb_grad(
    const scalar_t* __restrict__ a,
    const scalar_t* __restrict__ b,
    const scalar_t* __restrict__ rpb,
    scalar_t* __restrict__ out,
    const u32* __restrict__ table,
    const u32* __restrict__ params,
    const u64 total)
{
    const u32 k0 = params[P_KERNEL], k1 = params[P_KERNEL + 1], k2 = params[P_KERNEL + 2];
    const u32 e0 = params[P_EXTENT], e1 = params[P_EXTENT + 1], e2 = params[P_EXTENT + 2];
    const u32 s1 = 2 * k1 - 1, s2 = 2 * k2 - 1;
    const u64 volume = (u64)(2 * k0 - 1) * s1 * s2;
    const u32* a_s = params + P_A_STRIDES;

    for (u64 idx = (u64)blockIdx.x * blockDim.x + threadIdx.x; idx < total;
         idx += (u64)gridDim.x * blockDim.x) {
        u32 h = (u32)(idx / volume);
        u32 o = (u32)(idx % volume);
        u32 o2 = o % s2, o1 = (o / s2) % s1, o0 = o / (s1 * s2);

        acc_t acc = 0;
        for (u32 p0 = 0; p0 < e0; ++p0) {
            u32 r0 = table_at(table, params, 0, T_RPB, p0);
            if (o0 < r0 || o0 - r0 >= k0) continue;
            for (u32 p1 = 0; p1 < e1; ++p1) {
                u32 r1 = table_at(table, params, 1, T_RPB, p1);
                if (o1 < r1 || o1 - r1 >= k1) continue;
                for (u32 p2 = 0; p2 < e2; ++p2) {
                    u32 r2 = table_at(table, params, 2, T_RPB, p2);
                    if (o2 < r2 || o2 - r2 >= k2) continue;
                    u32 tap = ((o0 - r0) * k1 + (o1 - r1)) * k2 + (o2 - r2);
                    for (u32 n = 0; n < params[P_BATCH]; ++n)
                        acc += to_acc(a[operand_offset(a_s, n, h, p0, p1, p2) + (u64)tap * a_s[5]]);
                }
            }
        }
        out[idx] = from_acc(acc);
    }
}
"#;

/// Full source for one element type, or `None` if there is no prelude for
/// it.
pub fn kernel_source(dtype: DType) -> Option<String> {
    let prelude = match dtype {
        DType::F32 => F32_PRELUDE,
        DType::F64 => F64_PRELUDE,
        DType::F16 => F16_PRELUDE,
        DType::BF16 => return None,
    };
    Some(format!("{prelude}{NEIGHBORHOOD_CUDA}"))
}
